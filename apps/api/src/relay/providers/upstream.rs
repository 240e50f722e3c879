//! HTTP exchange and frame pump shared by both provider dialects.

use std::collections::VecDeque;
use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::lines::line_stream;
use super::{describe_access_denied, DeltaEvent, DeltaStream, ProviderEndpoint};
use crate::relay::error::RelayError;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// How a response body is cut into the units a `FrameDecoder` sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// Raw text lines, field names included.
    Lines,
    /// The `data` of each SSE event. Multi-line data arrives joined by `\n`.
    Events,
}

/// What a dialect decided about one upstream unit.
#[derive(Debug, PartialEq)]
pub(crate) enum Flow {
    Continue,
    /// The upstream signalled a clean end of stream.
    End,
    Fail(RelayError),
}

/// Decodes one upstream unit, pushing any deltas it carried onto `out`.
pub(crate) type FrameDecoder = fn(&str, &mut VecDeque<DeltaEvent>) -> Flow;

type Units = BoxStream<'static, Result<String, RelayError>>;

/// POSTs `body` to the endpoint and wraps the response in a lazy
/// `DeltaStream`, cut by `framing` and decoded unit by unit with `decode`.
pub(crate) fn open_stream(
    client: Client,
    endpoint: &ProviderEndpoint,
    body: Value,
    timeout: Duration,
    framing: Framing,
    decode: FrameDecoder,
) -> DeltaStream {
    let connect = send(client, endpoint.clone(), body, timeout).boxed();
    let pump = Pump {
        phase: Phase::Connecting(connect),
        pending: VecDeque::new(),
        framing,
        decode,
        read_timeout: timeout,
    };
    stream::unfold(pump, |mut pump| async move {
        pump.next_event().await.map(|event| (event, pump))
    })
    .boxed()
}

async fn send(
    client: Client,
    endpoint: ProviderEndpoint,
    body: Value,
    timeout: Duration,
) -> Result<reqwest::Response, RelayError> {
    let request = client
        .post(&endpoint.completions_url)
        .bearer_auth(&endpoint.api_key)
        .header(header::ACCEPT, "text/event-stream")
        .json(&body);

    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| {
            RelayError::transport(format!("no response from upstream within {timeout:?}"))
        })??;

    let status = response.status();
    if status.is_success() {
        debug!("Upstream {} accepted stream (status {status})", endpoint.completions_url);
        return Ok(response);
    }

    let text = tokio::time::timeout(timeout, response.text())
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();
    warn!("Upstream {} returned {status}", endpoint.completions_url);

    if status == StatusCode::FORBIDDEN {
        return Err(RelayError::UpstreamAuth(describe_access_denied(&text)));
    }
    let message: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
    let message = if message.trim().is_empty() {
        status.canonical_reason().unwrap_or("error").to_string()
    } else {
        message
    };
    Err(RelayError::http_status(status.as_u16(), message))
}

fn units(response: reqwest::Response, framing: Framing) -> Units {
    let body = response.bytes_stream();
    match framing {
        Framing::Lines => line_stream(body),
        Framing::Events => body
            .eventsource()
            .map(|event| event.map(|event| event.data).map_err(event_error))
            .boxed(),
    }
}

fn event_error(e: EventStreamError<reqwest::Error>) -> RelayError {
    match e {
        EventStreamError::Transport(e) => e.into(),
        other => RelayError::Decode(format!("malformed SSE event: {other}")),
    }
}

enum Phase {
    Connecting(BoxFuture<'static, Result<reqwest::Response, RelayError>>),
    Reading(Units),
    Finished,
}

struct Pump {
    phase: Phase,
    /// Decoded events not yet handed to the consumer.
    pending: VecDeque<DeltaEvent>,
    framing: Framing,
    decode: FrameDecoder,
    read_timeout: Duration,
}

impl Pump {
    async fn next_event(&mut self) -> Option<DeltaEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Finished => return None,
                Phase::Connecting(connect) => match connect.await {
                    Ok(response) => self.phase = Phase::Reading(units(response, self.framing)),
                    Err(e) => self.pending.push_back(DeltaEvent::Error(e)),
                },
                Phase::Reading(mut units) => {
                    match tokio::time::timeout(self.read_timeout, units.next()).await {
                        Err(_) => self.pending.push_back(DeltaEvent::Error(
                            RelayError::transport(format!(
                                "upstream stalled for more than {:?}",
                                self.read_timeout
                            )),
                        )),
                        Ok(Some(Err(e))) => self.pending.push_back(DeltaEvent::Error(e)),
                        Ok(Some(Ok(unit))) => match (self.decode)(&unit, &mut self.pending) {
                            Flow::Continue => self.phase = Phase::Reading(units),
                            Flow::End => self.pending.push_back(DeltaEvent::Done),
                            Flow::Fail(e) => self.pending.push_back(DeltaEvent::Error(e)),
                        },
                        Ok(None) => self.pending.push_back(DeltaEvent::Done),
                    }
                }
            }
        }
    }
}
