//! Client-facing SSE frames.

use std::convert::Infallible;

use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::relay::error::RelayError;

/// One `data:` line on the client wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WireFrame {
    Content {
        content: String,
    },
    Done {
        done: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Uuid>,
    },
    Error {
        error: String,
    },
}

impl WireFrame {
    pub fn content(text: impl Into<String>) -> Self {
        WireFrame::Content {
            content: text.into(),
        }
    }

    pub fn done(id: Uuid) -> Self {
        WireFrame::Done {
            done: true,
            id: Some(id),
        }
    }

    pub fn error(error: &RelayError) -> Self {
        WireFrame::Error {
            error: error.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"frame encoding failed: {e}"}}"#))
    }

    pub fn into_event(self) -> Event {
        Event::default().data(self.to_json())
    }
}

/// Streams frames from `rx` to the client until the sender side finishes.
pub fn sse_response(rx: mpsc::Receiver<WireFrame>) -> Response {
    let events = ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.into_event()));
    (
        [
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    #[test]
    fn test_frames_serialize_to_wire_shapes() {
        assert_eq!(WireFrame::content("Hel").to_json(), r#"{"content":"Hel"}"#);
        let id = Uuid::nil();
        assert_eq!(
            WireFrame::done(id).to_json(),
            format!(r#"{{"done":true,"id":"{id}"}}"#)
        );
        assert_eq!(
            WireFrame::error(&RelayError::transport("reset")).to_json(),
            r#"{"error":"upstream request failed: reset"}"#
        );
    }

    #[tokio::test]
    async fn test_sse_response_headers_and_body() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(WireFrame::content("a")).await.unwrap();
        tx.send(WireFrame::done(Uuid::nil())).await.unwrap();
        drop(tx);

        let response = sse_response(rx);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(headers[header::CONNECTION], "keep-alive");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(
            body,
            format!(
                "data: {{\"content\":\"a\"}}\n\ndata: {{\"done\":true,\"id\":\"{}\"}}\n\n",
                Uuid::nil()
            )
        );
    }
}
