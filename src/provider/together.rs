use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::api::{construct_api_url, error_message_from_body, ChatRequest};
use crate::core::message::{ChunkChoice, Message, MessageChunk, Part, Role, TokenUsage};
use crate::core::settings::{Model, ModelType, ProviderConnection, ProviderSetting};
use crate::files::FileManager;

use super::{outbound_messages, Notice, NoticeSender, Provider, ProviderError, TextGenerationParams};

/// Backend for the Together AI API. Same chat-completions shape as OpenAI,
/// but with a typed response carrying token usage and its own error body.
pub struct TogetherProvider {
    client: reqwest::Client,
    files: Arc<dyn FileManager>,
    notices: NoticeSender,
}

#[derive(Deserialize)]
struct TogetherResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<TogetherChoice>,
    usage: Option<TogetherUsage>,
}

#[derive(Deserialize)]
struct TogetherChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    finish_reason: Option<String>,
    message: TogetherChoiceMessage,
}

#[derive(Deserialize)]
struct TogetherChoiceMessage {
    role: Role,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TogetherUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct TogetherErrorBody {
    error: TogetherErrorDetail,
}

#[derive(Deserialize)]
struct TogetherErrorDetail {
    message: String,
}

impl TogetherProvider {
    pub fn new(client: reqwest::Client, files: Arc<dyn FileManager>, notices: NoticeSender) -> Self {
        Self {
            client,
            files,
            notices,
        }
    }

    fn connection(setting: &ProviderSetting) -> Result<&ProviderConnection, ProviderError> {
        match setting {
            ProviderSetting::TogetherAi(connection) => Ok(connection),
            other => Err(ProviderError::Configuration(format!(
                "Together backend handed '{}' settings",
                other.name()
            ))),
        }
    }

    fn parse_models(body: &str) -> Result<Vec<Model>, ProviderError> {
        let models: Vec<Model> =
            serde_json::from_str(body).map_err(|err| ProviderError::Parse(err.to_string()))?;
        Ok(models
            .into_iter()
            .filter(|model| model.kind == ModelType::Chat)
            .collect())
    }

    fn error_message(body: &str) -> String {
        match serde_json::from_str::<TogetherErrorBody>(body) {
            Ok(parsed) => parsed.error.message,
            Err(_) => error_message_from_body(body),
        }
    }

    fn parse_chat_response(body: &str) -> Result<MessageChunk, ProviderError> {
        let response: TogetherResponse =
            serde_json::from_str(body).map_err(|err| ProviderError::Parse(err.to_string()))?;
        let usage = response.usage.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });

        let choices = response
            .choices
            .into_iter()
            .next()
            .map(|choice| {
                vec![ChunkChoice {
                    index: choice.index,
                    delta: None,
                    message: Some(Message::new(
                        choice.message.role,
                        vec![Part::text(choice.message.content)],
                    )),
                    finish_reason: choice.finish_reason,
                }]
            })
            .unwrap_or_default();

        Ok(MessageChunk {
            id: response.id,
            model: response.model,
            choices,
            usage,
        })
    }
}

#[async_trait]
impl Provider for TogetherProvider {
    async fn list_models(&self, setting: &ProviderSetting) -> Vec<Model> {
        let connection = match Self::connection(setting) {
            Ok(connection) => connection,
            Err(err) => {
                tracing::warn!(error = %err, "model list skipped");
                return Vec::new();
            }
        };

        let response = self
            .client
            .get(construct_api_url(&connection.base_url, "models"))
            .header("Content-Type", "application/json")
            .bearer_auth(&connection.api_key)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "model list request failed");
                return Vec::new();
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            return match Self::parse_models(&body) {
                Ok(models) => models,
                Err(err) => {
                    tracing::warn!(error = %err, "model list body was unparsable");
                    Vec::new()
                }
            };
        }

        if status.is_client_error() {
            self.notices.send(Notice::Error(Self::error_message(&body)));
        } else {
            tracing::warn!(status = status.as_u16(), "model list request rejected");
        }
        Vec::new()
    }

    async fn generate_text(
        &self,
        setting: &ProviderSetting,
        messages: &[Message],
        params: &TextGenerationParams,
    ) -> Result<MessageChunk, ProviderError> {
        let connection = Self::connection(setting)?;
        let request = ChatRequest {
            model: params.model.id.clone(),
            messages: outbound_messages(messages, self.files.as_ref())?,
            temperature: params.temperature,
            top_p: params.top_p,
            stream: false,
        };

        let response = self
            .client
            .post(construct_api_url(&connection.base_url, "chat/completions"))
            .header("Content-Type", "application/json")
            .bearer_auth(&connection.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: Some(status.as_u16()),
                message: Self::error_message(&body),
            });
        }

        Self::parse_chat_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_completion_with_usage() {
        let body = r#"{
            "id": "t-1",
            "model": "meta-llama/Llama-3-70b",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": "Hello!"}
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let chunk = TogetherProvider::parse_chat_response(body).unwrap();
        assert_eq!(chunk.choices[0].message.as_ref().unwrap().to_text(), "Hello!");
        assert_eq!(
            chunk.usage,
            Some(TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 3,
                total_tokens: 15
            })
        );
    }

    #[test]
    fn structured_errors_yield_their_message() {
        let body = r#"{"error":{"message":"invalid api key","type":"authentication_error","code":"invalid_api_key"}}"#;
        assert_eq!(TogetherProvider::error_message(body), "invalid api key");
        // Unstructured bodies fall back to the raw text.
        assert_eq!(TogetherProvider::error_message("boom"), "boom");
    }

    #[test]
    fn model_lists_keep_only_chat_models() {
        let body = r#"[
            {"id": "meta-llama/Llama-3-70b", "display_name": "Llama 3 70B", "type": "chat"},
            {"id": "flux-schnell", "display_name": "FLUX", "type": "image"}
        ]"#;
        let models = TogetherProvider::parse_models(body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].display_name, "Llama 3 70B");
    }
}
