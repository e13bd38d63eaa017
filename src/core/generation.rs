use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::assistant::Assistant;
use crate::core::chat::ChatError;
use crate::core::message::{handle_message_chunk, Message};
use crate::core::settings::{Model, Settings};
use crate::core::transformer::{apply_transformers, MessageTransformer};
use crate::provider::registry::ProviderRegistry;
use crate::provider::TextGenerationParams;

/// One generation attempt, as handed to [`GenerationHandler::stream_text`].
pub struct StreamRequest {
    pub settings: Settings,
    pub model: Model,
    pub messages: Vec<Message>,
    pub transformers: Vec<Arc<dyn MessageTransformer>>,
    pub assistant: Option<Assistant>,
    pub params: Option<TextGenerationParams>,
    pub cancel_token: CancellationToken,
    pub generation_id: u64,
}

#[derive(Debug)]
pub enum StreamEvent {
    /// The transcript after folding the provider's chunk.
    Snapshot(Vec<Message>),
    Error(ChatError),
    End,
}

/// Orchestrates a single generation attempt: resolve the model's provider,
/// shape the outbound messages, call the provider, fold the chunk.
///
/// Emits `(event, generation_id)` pairs on an unbounded channel so the
/// consumer can drop events from a superseded attempt. The provider call is
/// whole-response today, so exactly one snapshot precedes `End`; a streaming
/// backend would emit more without changing the contract.
#[derive(Clone)]
pub struct GenerationHandler {
    registry: Arc<ProviderRegistry>,
}

impl GenerationHandler {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn stream_text(
        &self,
        request: StreamRequest,
    ) -> mpsc::UnboundedReceiver<(StreamEvent, u64)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let generation_id = request.generation_id;
            let token = request.cancel_token.clone();
            tokio::select! {
                _ = Self::run(registry, request, &tx) => {}
                _ = token.cancelled() => {}
            }
            let _ = tx.send((StreamEvent::End, generation_id));
        });
        rx
    }

    async fn run(
        registry: Arc<ProviderRegistry>,
        request: StreamRequest,
        tx: &mpsc::UnboundedSender<(StreamEvent, u64)>,
    ) {
        let generation_id = request.generation_id;
        match Self::attempt(&registry, &request).await {
            Ok(folded) => {
                let _ = tx.send((StreamEvent::Snapshot(folded), generation_id));
            }
            Err(err) => {
                let _ = tx.send((StreamEvent::Error(err), generation_id));
            }
        }
    }

    async fn attempt(
        registry: &ProviderRegistry,
        request: &StreamRequest,
    ) -> Result<Vec<Message>, ChatError> {
        let setting = request
            .settings
            .find_provider_for_model(&request.model.id)
            .ok_or_else(|| {
                ChatError::Configuration(format!(
                    "no provider configured for model '{}'",
                    request.model.id
                ))
            })?;
        let provider = registry.provider_for(setting);

        let mut outbound = Vec::with_capacity(request.messages.len() + 1);
        if let Some(assistant) = &request.assistant {
            if !assistant.system_prompt.trim().is_empty() {
                outbound.push(Message::system(assistant.system_prompt.clone()));
            }
        }
        outbound.extend(request.messages.iter().cloned());
        let outbound = apply_transformers(outbound, &request.transformers, &request.model);

        let params = request.params.clone().unwrap_or_else(|| {
            let mut params = TextGenerationParams::for_model(&request.model);
            if let Some(assistant) = &request.assistant {
                params.temperature = Some(assistant.temperature);
            }
            params
        });

        let chunk = provider
            .generate_text(setting, &outbound, &params)
            .await
            .map_err(ChatError::Provider)?;

        handle_message_chunk(&request.messages, &chunk).map_err(ChatError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{ChunkChoice, MessageChunk, Part, Role};
    use crate::core::settings::ProviderSetting;
    use crate::provider::{Provider, ProviderError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        chunk: Result<MessageChunk, &'static str>,
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Provider for Scripted {
        async fn list_models(&self, _setting: &ProviderSetting) -> Vec<Model> {
            Vec::new()
        }

        async fn generate_text(
            &self,
            _setting: &ProviderSetting,
            messages: &[Message],
            _params: &TextGenerationParams,
        ) -> Result<MessageChunk, ProviderError> {
            *self.seen.lock().unwrap() = messages.to_vec();
            self.chunk.clone().map_err(|msg| ProviderError::Api {
                status: Some(500),
                message: msg.to_string(),
            })
        }
    }

    fn assistant_chunk(text: &str) -> MessageChunk {
        MessageChunk {
            id: "c".to_string(),
            model: "m".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: None,
                message: Some(Message::assistant(text)),
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }
    }

    fn test_settings(model_id: &str) -> Settings {
        let mut settings = Settings::default();
        let provider = settings.providers[1].clone().add_model(Model::chat(model_id));
        settings.providers[1] = provider;
        settings.chat_model_id = model_id.to_string();
        settings
    }

    fn handler_with(openai: Box<dyn Provider>) -> GenerationHandler {
        struct Unused;
        #[async_trait]
        impl Provider for Unused {
            async fn list_models(&self, _s: &ProviderSetting) -> Vec<Model> {
                Vec::new()
            }
            async fn generate_text(
                &self,
                _s: &ProviderSetting,
                _m: &[Message],
                _p: &TextGenerationParams,
            ) -> Result<MessageChunk, ProviderError> {
                Err(ProviderError::Configuration("unused".to_string()))
            }
        }
        GenerationHandler::new(Arc::new(ProviderRegistry::scripted(openai, Box::new(Unused))))
    }

    fn request(settings: Settings, messages: Vec<Message>) -> StreamRequest {
        let model = settings
            .find_model_by_id(&settings.chat_model_id)
            .expect("test model")
            .clone();
        StreamRequest {
            settings,
            model,
            messages,
            transformers: Vec::new(),
            assistant: None,
            params: None,
            cancel_token: CancellationToken::new(),
            generation_id: 1,
        }
    }

    #[tokio::test]
    async fn emits_one_snapshot_then_end() {
        let handler = handler_with(Box::new(Scripted {
            chunk: Ok(assistant_chunk("4")),
            seen: Mutex::new(Vec::new()),
        }));
        let mut rx = handler.stream_text(request(test_settings("m"), vec![Message::user("2+2?")]));

        match rx.recv().await {
            Some((StreamEvent::Snapshot(messages), 1)) => {
                assert_eq!(messages.len(), 2);
                assert_eq!(messages[1].to_text(), "4");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some((StreamEvent::End, 1))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn provider_failures_surface_then_end() {
        let handler = handler_with(Box::new(Scripted {
            chunk: Err("overloaded"),
            seen: Mutex::new(Vec::new()),
        }));
        let mut rx = handler.stream_text(request(test_settings("m"), vec![Message::user("hi")]));

        match rx.recv().await {
            Some((StreamEvent::Error(ChatError::Provider(err)), 1)) => {
                assert!(err.to_string().contains("overloaded"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some((StreamEvent::End, 1))));
    }

    #[tokio::test]
    async fn unconfigured_models_are_a_configuration_error() {
        let handler = handler_with(Box::new(Scripted {
            chunk: Ok(assistant_chunk("x")),
            seen: Mutex::new(Vec::new()),
        }));
        let mut settings = test_settings("m");
        settings.providers = Settings::default().providers; // drop the model mapping
        let mut request = request(test_settings("m"), vec![Message::user("hi")]);
        request.settings = settings;

        let mut rx = handler.stream_text(request);
        assert!(matches!(
            rx.recv().await,
            Some((StreamEvent::Error(ChatError::Configuration(_)), 1))
        ));
    }

    #[tokio::test]
    async fn persona_prompt_and_transformers_shape_the_outbound_list() {
        let scripted = Arc::new(Scripted {
            chunk: Ok(assistant_chunk("ok")),
            seen: Mutex::new(Vec::new()),
        });

        struct Passthrough(Arc<Scripted>);
        #[async_trait]
        impl Provider for Passthrough {
            async fn list_models(&self, s: &ProviderSetting) -> Vec<Model> {
                self.0.list_models(s).await
            }
            async fn generate_text(
                &self,
                s: &ProviderSetting,
                m: &[Message],
                p: &TextGenerationParams,
            ) -> Result<MessageChunk, ProviderError> {
                self.0.generate_text(s, m, p).await
            }
        }

        struct Upcase;
        impl MessageTransformer for Upcase {
            fn transform(&self, messages: Vec<Message>, _model: &Model) -> Vec<Message> {
                messages
                    .into_iter()
                    .map(|m| {
                        let text = m.to_text().to_uppercase();
                        m.with_parts(vec![Part::text(text)])
                    })
                    .collect()
            }
        }

        let handler = handler_with(Box::new(Passthrough(scripted.clone())));
        let mut req = request(test_settings("m"), vec![Message::user("hi")]);
        req.assistant = Some(Assistant {
            system_prompt: "be brief".to_string(),
            ..Assistant::default()
        });
        req.transformers = vec![Arc::new(Upcase)];

        let mut rx = handler.stream_text(req);
        while rx.recv().await.is_some() {}

        let seen = scripted.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].role, Role::System);
        assert_eq!(seen[0].to_text(), "BE BRIEF");
        assert_eq!(seen[1].to_text(), "HI");
    }
}
