//! Drives one session from an adapter stream to the client and the sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::persistence::{PersistedRecord, PersistenceSink};
use crate::relay::error::RelayError;
use crate::relay::frames::WireFrame;
use crate::relay::providers::{DeltaEvent, ProviderAdapter, ProviderKind};
use crate::relay::session::{StreamSession, Transition};

const FRAME_BUFFER: usize = 32;

/// The client went away; nothing more can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Where a session's frames go.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&mut self, frame: WireFrame) -> Result<(), Disconnected>;

    /// Resolves once the client can no longer receive frames.
    async fn closed(&self);
}

/// Feeds an SSE response body. A send that does not complete within
/// `write_timeout` counts as a disconnect.
pub struct ChannelSink {
    tx: mpsc::Sender<WireFrame>,
    write_timeout: Duration,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<WireFrame>, write_timeout: Duration) -> Self {
        Self { tx, write_timeout }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), Disconnected> {
        match tokio::time::timeout(self.write_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(Disconnected),
        }
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Discards frames. Used when the caller only wants the collected answer.
pub struct NullSink;

#[async_trait]
impl FrameSink for NullSink {
    async fn send(&mut self, _frame: WireFrame) -> Result<(), Disconnected> {
        Ok(())
    }

    async fn closed(&self) {
        futures::future::pending::<()>().await
    }
}

#[derive(Debug)]
pub enum SessionOutcome {
    Completed {
        id: Uuid,
        answer: String,
        reasoning: String,
        /// The answer was delivered either way; this only reports the save.
        persisted: Result<PersistedRecord, RelayError>,
    },
    Failed(RelayError),
    /// Client disconnect or shutdown. Nothing was persisted.
    Aborted,
}

pub struct StreamRelay {
    reasoning: Arc<dyn ProviderAdapter>,
    completion: Arc<dyn ProviderAdapter>,
    sink: Arc<dyn PersistenceSink>,
    shutdown: CancellationToken,
}

impl StreamRelay {
    pub fn new(
        reasoning: Arc<dyn ProviderAdapter>,
        completion: Arc<dyn ProviderAdapter>,
        sink: Arc<dyn PersistenceSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reasoning,
            completion,
            sink,
            shutdown,
        }
    }

    fn adapter(&self, kind: ProviderKind) -> &dyn ProviderAdapter {
        match kind {
            ProviderKind::ReasoningMultimodal => self.reasoning.as_ref(),
            ProviderKind::PlainCompletion => self.completion.as_ref(),
        }
    }

    /// Relays `session` to `frames` until a terminal event, a disconnect or
    /// shutdown.
    pub async fn run<F: FrameSink>(
        &self,
        mut session: StreamSession,
        frames: &mut F,
    ) -> SessionOutcome {
        let id = session.id;
        let adapter = self.adapter(session.provider);
        info!(session = %id, provider = %adapter.kind(), "Relay session started");

        let mut upstream = adapter.open(session.request.clone(), session.timeout);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    warn!(session = %id, "Relay session aborted by shutdown");
                    return SessionOutcome::Aborted;
                }
                _ = frames.closed() => {
                    info!(session = %id, "Client disconnected; dropping upstream");
                    return SessionOutcome::Aborted;
                }
                event = upstream.next() => event,
            };
            let event = event.unwrap_or_else(|| {
                DeltaEvent::Error(RelayError::transport(
                    "upstream stream ended without a terminal event",
                ))
            });

            match session.apply(event) {
                Transition::Relay(text) => {
                    if frames.send(WireFrame::content(text)).await.is_err() {
                        info!(session = %id, "Client disconnected; dropping upstream");
                        return SessionOutcome::Aborted;
                    }
                }
                Transition::Absorbed | Transition::Ignored => {}
                Transition::Failed(e) => {
                    drop(upstream);
                    error!(session = %id, "Relay session failed: {e}");
                    let _ = frames.send(WireFrame::error(&e)).await;
                    return SessionOutcome::Failed(e);
                }
                Transition::Completed => {
                    drop(upstream);
                    return self.complete(session, frames).await;
                }
            }
        }
    }

    async fn complete<F: FrameSink>(
        &self,
        session: StreamSession,
        frames: &mut F,
    ) -> SessionOutcome {
        let id = session.id;
        if frames.send(WireFrame::done(id)).await.is_err() {
            warn!(session = %id, "Done frame not delivered; persisting anyway");
        }

        let persisted = match session.finished_artifact() {
            Some(artifact) => self.sink.upsert(&artifact).await,
            None => Err(RelayError::Persistence("session did not complete".to_string())),
        };
        match &persisted {
            Ok(record) => info!(
                session = %id,
                answer_chars = session.answer().chars().count(),
                "Relay session completed and saved as {}",
                record.id
            ),
            Err(e) => {
                error!(session = %id, "Relay session completed but was not saved: {e}");
                let _ = frames.send(WireFrame::error(e)).await;
            }
        }

        SessionOutcome::Completed {
            id,
            answer: session.answer().to_string(),
            reasoning: session.reasoning().to_string(),
            persisted,
        }
    }

    /// Runs `session` to completion without a client stream.
    pub async fn collect(&self, session: StreamSession) -> SessionOutcome {
        self.run(session, &mut NullSink).await
    }

    /// Starts `session` on its own task and returns the frames it produces.
    ///
    /// Dropping the receiver disconnects the session.
    pub fn spawn(self: &Arc<Self>, session: StreamSession) -> mpsc::Receiver<WireFrame> {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let relay = Arc::clone(self);
        let mut frames = ChannelSink::new(tx, session.timeout);
        tokio::spawn(async move {
            relay.run(session, &mut frames).await;
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::stream;
    use reqwest::Client;

    use super::*;
    use crate::persistence::test_support::MemorySink;
    use crate::persistence::{ArtifactDraft, PersistedArtifact};
    use crate::relay::messages::{ChatMessage, Role};
    use crate::relay::providers::test_support::{canned_upstream, hanging_upstream, request};
    use crate::relay::providers::{
        CompletionAdapter, CompletionRequest, DeltaStream, ReasoningAdapter,
    };

    /// Replays a fixed event list, then optionally hangs forever.
    struct ScriptedAdapter {
        events: Vec<DeltaEvent>,
        hang: bool,
        opened: AtomicUsize,
        released: Arc<AtomicBool>,
    }

    struct ReleaseGuard(Arc<AtomicBool>);

    impl Drop for ReleaseGuard {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl ScriptedAdapter {
        fn new(events: Vec<DeltaEvent>) -> Self {
            Self {
                events,
                hang: false,
                opened: AtomicUsize::new(0),
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        fn hanging(events: Vec<DeltaEvent>) -> Self {
            Self {
                hang: true,
                ..Self::new(events)
            }
        }
    }

    impl ProviderAdapter for ScriptedAdapter {
        fn kind(&self) -> ProviderKind {
            ProviderKind::ReasoningMultimodal
        }

        fn open(&self, _request: CompletionRequest, _timeout: Duration) -> DeltaStream {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let guard = ReleaseGuard(self.released.clone());
            let head = stream::iter(self.events.clone());
            if self.hang {
                let tail = stream::unfold(guard, |guard| async move {
                    futures::future::pending::<()>().await;
                    drop(guard);
                    None::<(DeltaEvent, ReleaseGuard)>
                });
                head.chain(tail).boxed()
            } else {
                let tail = stream::unfold(guard, |_| async { None::<(DeltaEvent, ReleaseGuard)> });
                head.chain(tail).boxed()
            }
        }
    }

    fn events() -> Vec<DeltaEvent> {
        vec![
            DeltaEvent::Reasoning("think ".to_string()),
            DeltaEvent::Answer("Hel".to_string()),
            DeltaEvent::Reasoning("more".to_string()),
            DeltaEvent::Answer("lo".to_string()),
            DeltaEvent::Done,
        ]
    }

    fn relay_with(adapter: Arc<dyn ProviderAdapter>, sink: Arc<MemorySink>) -> Arc<StreamRelay> {
        Arc::new(StreamRelay::new(
            adapter.clone(),
            adapter,
            sink,
            CancellationToken::new(),
        ))
    }

    fn chat_session(provider: ProviderKind) -> StreamSession {
        chat_session_within(provider, Duration::from_secs(5))
    }

    fn chat_session_within(provider: ProviderKind, timeout: Duration) -> StreamSession {
        StreamSession::new(
            provider,
            request(),
            ArtifactDraft::ChatHistory {
                history_id: None,
                title: "greeting".to_string(),
                transcript: vec![ChatMessage::new(Role::User, "hello")],
            },
            timeout,
        )
    }

    async fn drain(mut rx: mpsc::Receiver<WireFrame>) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_collect_concatenates_both_channels() {
        let sink = Arc::new(MemorySink::default());
        let relay = relay_with(Arc::new(ScriptedAdapter::new(events())), sink.clone());

        let SessionOutcome::Completed {
            answer,
            reasoning,
            persisted,
            id,
        } = relay.collect(chat_session(ProviderKind::ReasoningMultimodal)).await
        else {
            panic!("expected completion");
        };
        assert_eq!(answer, "Hello");
        assert_eq!(reasoning, "think more");
        assert_eq!(persisted.unwrap().id, id);

        let saved = sink.saved();
        assert_eq!(saved.len(), 1);
        let PersistedArtifact::ChatHistory(history) = &saved[0] else {
            panic!("expected chat history");
        };
        assert_eq!(history.messages.last().unwrap().text(), "Hello");
    }

    #[tokio::test]
    async fn test_streamed_content_matches_collected_answer() {
        let sink = Arc::new(MemorySink::default());
        let relay = relay_with(Arc::new(ScriptedAdapter::new(events())), sink.clone());

        let session = chat_session(ProviderKind::ReasoningMultimodal);
        let id = session.id;
        let frames = drain(relay.spawn(session)).await;
        assert_eq!(
            frames,
            vec![
                WireFrame::content("Hel"),
                WireFrame::content("lo"),
                WireFrame::done(id)
            ]
        );

        let streamed: String = frames
            .iter()
            .filter_map(|f| match f {
                WireFrame::Content { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        let SessionOutcome::Completed { answer, .. } =
            relay.collect(chat_session(ProviderKind::ReasoningMultimodal)).await
        else {
            panic!("expected completion");
        };
        assert_eq!(streamed, answer);
    }

    #[tokio::test]
    async fn test_upstream_error_emits_single_error_frame_and_skips_persistence() {
        let sink = Arc::new(MemorySink::default());
        let err = RelayError::http_status(502, "bad gateway");
        let relay = relay_with(
            Arc::new(ScriptedAdapter::new(vec![
                DeltaEvent::Answer("partial".to_string()),
                DeltaEvent::Error(err.clone()),
            ])),
            sink.clone(),
        );

        let frames = drain(relay.spawn(chat_session(ProviderKind::ReasoningMultimodal))).await;
        assert_eq!(
            frames,
            vec![WireFrame::content("partial"), WireFrame::error(&err)]
        );
        assert!(sink.saved().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_follows_done_frame() {
        let sink = Arc::new(MemorySink::failing("connection refused"));
        let relay = relay_with(Arc::new(ScriptedAdapter::new(events())), sink);

        let session = chat_session(ProviderKind::ReasoningMultimodal);
        let id = session.id;
        let frames = drain(relay.spawn(session)).await;
        let done_at = frames
            .iter()
            .position(|f| *f == WireFrame::done(id))
            .unwrap();
        assert_eq!(
            &frames[done_at..],
            &[
                WireFrame::done(id),
                WireFrame::error(&RelayError::Persistence("connection refused".to_string()))
            ]
        );
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_upstream_without_saving() {
        let sink = Arc::new(MemorySink::default());
        let adapter = Arc::new(ScriptedAdapter::hanging(vec![DeltaEvent::Answer(
            "a".to_string(),
        )]));
        let released = adapter.released.clone();
        let relay = relay_with(adapter, sink.clone());

        let (tx, mut rx) = mpsc::channel(1);
        let mut frames = ChannelSink::new(tx, Duration::from_secs(5));
        let session = chat_session(ProviderKind::ReasoningMultimodal);
        let run = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(session, &mut frames).await }
        });

        assert_eq!(rx.recv().await, Some(WireFrame::content("a")));
        drop(rx);

        let outcome = run.await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Aborted));
        assert!(released.load(Ordering::SeqCst));
        assert!(sink.saved().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_live_session() {
        let sink = Arc::new(MemorySink::default());
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(ScriptedAdapter::hanging(vec![]));
        let shutdown = CancellationToken::new();
        let relay = Arc::new(StreamRelay::new(
            adapter.clone(),
            adapter,
            sink.clone(),
            shutdown.clone(),
        ));

        let rx = relay.spawn(chat_session(ProviderKind::ReasoningMultimodal));
        shutdown.cancel();
        assert!(drain(rx).await.is_empty());
        assert!(sink.saved().is_empty());
    }

    #[tokio::test]
    async fn test_stream_without_terminal_event_fails() {
        let sink = Arc::new(MemorySink::default());
        let relay = relay_with(
            Arc::new(ScriptedAdapter::new(vec![DeltaEvent::Answer("x".to_string())])),
            sink.clone(),
        );

        let outcome = relay.collect(chat_session(ProviderKind::ReasoningMultimodal)).await;
        assert!(matches!(
            outcome,
            SessionOutcome::Failed(RelayError::UpstreamTransport { .. })
        ));
        assert!(sink.saved().is_empty());
    }

    #[tokio::test]
    async fn test_each_session_opens_its_own_upstream() {
        let sink = Arc::new(MemorySink::default());
        let adapter = Arc::new(ScriptedAdapter::new(events()));
        let relay = relay_with(adapter.clone(), sink.clone());

        relay.collect(chat_session(ProviderKind::ReasoningMultimodal)).await;
        relay.collect(chat_session(ProviderKind::ReasoningMultimodal)).await;
        assert_eq!(adapter.opened.load(Ordering::SeqCst), 2);
        assert_eq!(sink.saved().len(), 2);
    }

    #[tokio::test]
    async fn test_plain_completion_end_to_end_skips_garbage_and_sentinel() {
        let endpoint = canned_upstream(
            axum::http::StatusCode::OK,
            "data: not-json\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\
             data: [DONE]\n",
        )
        .await;
        let adapter: Arc<dyn ProviderAdapter> =
            Arc::new(CompletionAdapter::new(Client::new(), endpoint));
        let sink = Arc::new(MemorySink::default());
        let relay = relay_with(adapter, sink.clone());

        let session = StreamSession::new(
            ProviderKind::PlainCompletion,
            request(),
            ArtifactDraft::JdBreakdown {
                jd_id: Uuid::new_v4(),
                company: "Acme".to_string(),
                position: "SRE".to_string(),
            },
            Duration::from_secs(5),
        );
        let id = session.id;
        let frames = drain(relay.spawn(session)).await;
        assert_eq!(frames, vec![WireFrame::content("ok"), WireFrame::done(id)]);
        assert!(frames.iter().all(|f| !f.to_json().contains("[DONE]")));

        let saved = sink.saved();
        let [PersistedArtifact::JdBreakdown(breakdown)] = saved.as_slice() else {
            panic!("expected one breakdown, got {saved:?}");
        };
        assert_eq!(breakdown.id, id);
        assert_eq!(breakdown.breakdown_content, "ok");
    }

    #[tokio::test]
    async fn test_stalled_upstream_fails_without_saving() {
        let endpoint =
            hanging_upstream("data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n").await;
        let adapter: Arc<dyn ProviderAdapter> =
            Arc::new(ReasoningAdapter::new(Client::new(), endpoint));
        let sink = Arc::new(MemorySink::default());
        let relay = relay_with(adapter, sink.clone());

        let session =
            chat_session_within(ProviderKind::ReasoningMultimodal, Duration::from_millis(200));
        let frames = drain(relay.spawn(session)).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], WireFrame::content("par"));
        let WireFrame::Error { error } = &frames[1] else {
            panic!("expected an error frame, got {:?}", frames[1]);
        };
        assert!(error.contains("stalled"));
        assert!(sink.saved().is_empty());
    }

    #[tokio::test]
    async fn test_client_that_stops_reading_is_treated_as_disconnected() {
        let sink = Arc::new(MemorySink::default());
        let relay = relay_with(
            Arc::new(ScriptedAdapter::new(vec![
                DeltaEvent::Answer("a".to_string()),
                DeltaEvent::Answer("b".to_string()),
                DeltaEvent::Answer("c".to_string()),
                DeltaEvent::Done,
            ])),
            sink.clone(),
        );

        // Held but never read, so the second frame cannot be queued.
        let (tx, rx) = mpsc::channel(1);
        let mut frames = ChannelSink::new(tx, Duration::from_millis(50));
        let outcome = relay
            .run(chat_session(ProviderKind::ReasoningMultimodal), &mut frames)
            .await;

        assert!(matches!(outcome, SessionOutcome::Aborted));
        assert!(sink.saved().is_empty());
        drop(rx);
    }
}
