use std::time::Duration;

use uuid::Uuid;

use crate::persistence::{ArtifactDraft, PersistedArtifact};
use crate::relay::error::RelayError;
use crate::relay::providers::{CompletionRequest, DeltaEvent, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed,
    Failed,
}

/// What the relay must do after feeding one event to a session.
#[derive(Debug, PartialEq)]
pub enum Transition {
    /// Forward this answer delta to the client.
    Relay(String),
    /// Reasoning was accumulated; nothing to forward.
    Absorbed,
    Completed,
    Failed(RelayError),
    /// The session was already terminal; the event changed nothing.
    Ignored,
}

/// One relay session, from the first upstream byte to persistence.
///
/// Consumed by value by `StreamRelay`, so a session cannot be run twice.
#[derive(Debug)]
pub struct StreamSession {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub request: CompletionRequest,
    /// Bounds connecting, each upstream read and each client write.
    pub timeout: Duration,
    pub artifact: ArtifactDraft,
    answer: String,
    reasoning: String,
    state: SessionState,
}

impl StreamSession {
    pub fn new(
        provider: ProviderKind,
        request: CompletionRequest,
        artifact: ArtifactDraft,
        timeout: Duration,
    ) -> Self {
        Self {
            id: artifact.key().unwrap_or_else(Uuid::new_v4),
            provider,
            request,
            timeout,
            artifact,
            answer: String::new(),
            reasoning: String::new(),
            state: SessionState::Active,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn apply(&mut self, event: DeltaEvent) -> Transition {
        if self.state != SessionState::Active {
            return Transition::Ignored;
        }
        match event {
            DeltaEvent::Answer(text) => {
                self.answer.push_str(&text);
                Transition::Relay(text)
            }
            DeltaEvent::Reasoning(text) => {
                self.reasoning.push_str(&text);
                Transition::Absorbed
            }
            DeltaEvent::Done => {
                self.state = SessionState::Completed;
                Transition::Completed
            }
            DeltaEvent::Error(e) => {
                self.state = SessionState::Failed;
                Transition::Failed(e)
            }
        }
    }

    /// The record to persist. `None` unless the session completed.
    pub fn finished_artifact(&self) -> Option<PersistedArtifact> {
        (self.state == SessionState::Completed)
            .then(|| self.artifact.finish(self.id, &self.answer))
    }
}
