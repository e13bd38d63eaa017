//! The provider seam: backends differ in request/response shape but agree on
//! the `{list_models, generate_text}` contract, which keeps the controller
//! provider-agnostic.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::message::{Message, MessageChunk, Part};
use crate::core::settings::{Model, ProviderSetting};
use crate::files::FileManager;

pub mod openai;
pub mod registry;
pub mod together;

#[derive(Debug)]
pub enum ProviderError {
    /// The HTTP call never produced a response.
    Transport(String),
    /// Non-success status or an error body; `message` is the extracted
    /// human-readable summary.
    Api { status: Option<u16>, message: String },
    /// The response arrived but could not be interpreted.
    Parse(String),
    /// A local file referenced by the transcript could not be read.
    File(String),
    /// The provider was handed another backend's settings. The registry
    /// makes this unreachable; it exists so the mismatch is an error rather
    /// than a panic.
    Configuration(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(message) => write!(f, "transport error: {message}"),
            ProviderError::Api { status: Some(status), message } => {
                write!(f, "API error ({status}): {message}")
            }
            ProviderError::Api { status: None, message } => write!(f, "API error: {message}"),
            ProviderError::Parse(message) => write!(f, "unparsable response: {message}"),
            ProviderError::File(message) => write!(f, "local file error: {message}"),
            ProviderError::Configuration(message) => write!(f, "configuration error: {message}"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

/// User-visible notices raised outside a generation attempt (for example a
/// failed model-list refresh). The presentation layer drains the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Error(String),
}

#[derive(Clone)]
pub struct NoticeSender {
    tx: mpsc::UnboundedSender<Notice>,
}

impl NoticeSender {
    pub fn channel() -> (NoticeSender, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (NoticeSender { tx }, rx)
    }

    pub fn send(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextGenerationParams {
    pub model: Model,
    pub temperature: Option<f32>,
    pub top_p: f32,
}

impl TextGenerationParams {
    pub fn for_model(model: &Model) -> Self {
        Self {
            model: model.clone(),
            temperature: Some(0.6),
            top_p: 1.0,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Fetch the provider's model list. Never errors: a failed request
    /// surfaces a [`Notice`] (HTTP error bodies) or a log line (transport
    /// failures) and yields an empty list.
    async fn list_models(&self, setting: &ProviderSetting) -> Vec<Model>;

    /// Issue one whole-response generation call and translate the body into
    /// a [`MessageChunk`].
    async fn generate_text(
        &self,
        setting: &ProviderSetting,
        messages: &[Message],
        params: &TextGenerationParams,
    ) -> Result<MessageChunk, ProviderError>;
}

/// Serialize the transcript for upload: messages without text are skipped,
/// single-text messages keep plain-string content, and anything richer
/// becomes a content-part array with local images inlined as data URLs.
pub(crate) fn outbound_messages(
    messages: &[Message],
    files: &dyn FileManager,
) -> Result<Vec<Value>, ProviderError> {
    messages
        .iter()
        .filter(|message| message.is_valid_to_upload())
        .map(|message| message_to_wire(message, files))
        .collect()
}

fn message_to_wire(message: &Message, files: &dyn FileManager) -> Result<Value, ProviderError> {
    let content = match message.parts.as_slice() {
        [Part::Text { text }] => Value::String(text.clone()),
        parts => {
            let mut entries = Vec::new();
            for part in parts {
                match part {
                    Part::Text { text } => {
                        entries.push(json!({ "type": "text", "text": text }));
                    }
                    Part::Image { url, is_local } => {
                        let image_url = if *is_local {
                            files
                                .file_as_data_url(url)
                                .map_err(|err| ProviderError::File(format!("{url}: {err}")))?
                        } else {
                            url.clone()
                        };
                        entries.push(json!({
                            "type": "image_url",
                            "image_url": { "url": image_url }
                        }));
                    }
                    Part::ToolResult { .. } => {}
                }
            }
            Value::Array(entries)
        }
    };

    Ok(json!({ "role": message.role.as_str(), "content": content }))
}


#[cfg(test)]
mod tests {
    use super::test_support::StubFiles;
    use super::*;
    use crate::core::message::Role;

    #[test]
    fn single_text_messages_use_plain_content() {
        let wire = outbound_messages(&[Message::user("hi")], &StubFiles).unwrap();
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"], "hi");
    }

    #[test]
    fn messages_without_text_are_filtered_out() {
        let image_only = Message::new(Role::User, vec![Part::image("https://i/x.png", false)]);
        let wire = outbound_messages(&[image_only, Message::user("hi")], &StubFiles).unwrap();
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn mixed_parts_become_a_content_array() {
        let message = Message::new(
            Role::User,
            vec![
                Part::text("look at this"),
                Part::image("file:///tmp/shot.png", true),
                Part::image("https://img.example/a.png", false),
            ],
        );
        let wire = outbound_messages(&[message], &StubFiles).unwrap();
        let content = wire[0]["content"].as_array().expect("content array");
        assert_eq!(content.len(), 3);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/png;base64,stub-file:///tmp/shot.png"
        );
        assert_eq!(content[2]["image_url"]["url"], "https://img.example/a.png");
    }

    #[test]
    fn local_image_read_failures_become_file_errors() {
        struct FailingFiles;
        impl FileManager for FailingFiles {
            fn file_as_data_url(&self, _path: &str) -> Result<String, crate::files::FileError> {
                Err(crate::files::FileError::Io(std::io::Error::other("gone")))
            }
            fn delete_files(&self, _paths: &[String]) {}
        }

        let message = Message::new(
            Role::User,
            vec![Part::text("see"), Part::image("file:///gone.png", true)],
        );
        let err = outbound_messages(&[message], &FailingFiles).unwrap_err();
        assert!(matches!(err, ProviderError::File(_)));
    }
}
