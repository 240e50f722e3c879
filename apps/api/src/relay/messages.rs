//! Message normalization: client chat history → provider wire messages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::relay::error::RelayError;
use crate::relay::providers::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(RelayError::Validation(format!(
                "unrecognized message role '{other}' (expected system, user or assistant)"
            ))),
        }
    }
}

/// A message as the client sends it.
///
/// `role` stays a raw string here so an unknown role surfaces as a
/// `Validation` error from `normalize` instead of a generic JSON rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image_urls: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: Some(content.into()),
            image_urls: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

/// One segment of a multipart message body.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NormalizedMessage {
    pub role: Role,
    pub content: MessageBody,
}

impl NormalizedMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageBody::Text(text.into()),
        }
    }
}

/// Converts a client message history into the wire shape `provider` accepts.
///
/// Image references are forwarded as-is: clients send either absolute URLs or
/// the published path the blob store handed back on upload.
pub fn normalize(
    messages: &[ChatMessage],
    provider: ProviderKind,
) -> Result<Vec<NormalizedMessage>, RelayError> {
    messages
        .iter()
        .map(|message| normalize_one(message, provider))
        .collect()
}

fn normalize_one(
    message: &ChatMessage,
    provider: ProviderKind,
) -> Result<NormalizedMessage, RelayError> {
    let role: Role = message.role.parse()?;
    let text = message.text();

    if message.image_urls.is_empty() {
        return Ok(NormalizedMessage::text(role, text));
    }

    if !provider.accepts_images() {
        warn!(
            "Dropping {} image reference(s) from a {role} message: provider {provider} is text-only",
            message.image_urls.len()
        );
        return Ok(NormalizedMessage::text(role, text));
    }

    let mut parts: Vec<ContentPart> = message
        .image_urls
        .iter()
        .map(|url| ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.clone() },
        })
        .collect();

    // Blank text is omitted, never sent as an empty segment.
    if !text.trim().is_empty() {
        parts.push(ContentPart::Text {
            text: text.to_string(),
        });
    }

    Ok(NormalizedMessage {
        role,
        content: MessageBody::Parts(parts),
    })
}
