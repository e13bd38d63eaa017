use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{construct_api_url, error_message_from_body, extract_error_summary, ChatRequest, ChatResponse};
use crate::core::message::{ChunkChoice, Message, MessageChunk, Part, Role};
use crate::core::settings::{Model, ModelType, ProviderConnection, ProviderSetting};
use crate::files::FileManager;

use super::{outbound_messages, Notice, NoticeSender, Provider, ProviderError, TextGenerationParams};

/// Backend for OpenAI-compatible APIs.
pub struct OpenAiProvider {
    client: reqwest::Client,
    files: Arc<dyn FileManager>,
    notices: NoticeSender,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, files: Arc<dyn FileManager>, notices: NoticeSender) -> Self {
        Self {
            client,
            files,
            notices,
        }
    }

    fn connection(setting: &ProviderSetting) -> Result<&ProviderConnection, ProviderError> {
        match setting {
            ProviderSetting::OpenAi(connection) => Ok(connection),
            other => Err(ProviderError::Configuration(format!(
                "OpenAI backend handed '{}' settings",
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

    fn parse_chat_response(body: &str) -> Result<MessageChunk, ProviderError> {
        let response: ChatResponse =
            serde_json::from_str(body).map_err(|err| ProviderError::Parse(err.to_string()))?;
        let ChatResponse { id, model, choices } = response;

        if let Some(choice) = choices.into_iter().next() {
            let body = choice
                .message
                .ok_or_else(|| ProviderError::Parse("choice carried no message".to_string()))?;
            let message = Message::new(
                Role::from_wire(&body.role),
                vec![Part::text(body.content.unwrap_or_default())],
            );
            return Ok(MessageChunk {
                id,
                model,
                choices: vec![ChunkChoice {
                    index: choice.index,
                    delta: None,
                    message: Some(message),
                    finish_reason: choice.finish_reason,
                }],
                usage: None,
            });
        }

        // Some deployments smuggle a structured error into a 200 body.
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if let Some(summary) = extract_error_summary(&value) {
                return Err(ProviderError::Api {
                    status: None,
                    message: summary,
                });
            }
        }

        Ok(MessageChunk {
            id,
            model,
            choices: Vec::new(),
            usage: None,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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
        if !status.is_success() {
            self.notices
                .send(Notice::Error(error_message_from_body(&body)));
            return Vec::new();
        }

        match Self::parse_models(&body) {
            Ok(models) => models,
            Err(err) => {
                tracing::warn!(error = %err, "model list body was unparsable");
                Vec::new()
            }
        }
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
                message: error_message_from_body(&body),
            });
        }

        Self::parse_chat_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_successful_completion() {
        let body = r#"{
            "id": "cmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "4"},
                "finish_reason": "stop"
            }]
        }"#;
        let chunk = OpenAiProvider::parse_chat_response(body).unwrap();
        assert_eq!(chunk.id, "cmpl-1");
        assert_eq!(chunk.model, "gpt-4o");
        let message = chunk.choices[0].message.as_ref().unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.to_text(), "4");
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn error_bodies_become_api_errors() {
        let body = r#"{"error":{"message":"bad key","type":"invalid_request_error"}}"#;
        let err = OpenAiProvider::parse_chat_response(body).unwrap_err();
        match err {
            ProviderError::Api { message, .. } => assert_eq!(message, "bad key"),
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn choiceless_success_bodies_yield_an_empty_chunk() {
        let chunk = OpenAiProvider::parse_chat_response(r#"{"id":"x","model":"m","choices":[]}"#)
            .unwrap();
        assert!(chunk.choices.is_empty());
    }

    #[test]
    fn model_lists_keep_only_chat_models() {
        let body = r#"[
            {"id": "gpt-4o", "display_name": "GPT-4o", "type": "chat"},
            {"id": "embed-1", "display_name": "Embedder", "type": "embedding"},
            {"id": "exotic", "display_name": "Exotic", "type": "reranker"}
        ]"#;
        let models = OpenAiProvider::parse_models(body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "gpt-4o");
    }
}
