use std::sync::Arc;

use crate::core::settings::ProviderSetting;
use crate::files::FileManager;

use super::openai::OpenAiProvider;
use super::together::TogetherProvider;
use super::{NoticeSender, Provider};

/// Maps each provider-setting variant to its backend.
///
/// Constructed once at startup and passed by reference; the dispatch is a
/// total match over the closed [`ProviderSetting`] set, so an unmapped
/// variant cannot exist.
pub struct ProviderRegistry {
    openai: Box<dyn Provider>,
    together: Box<dyn Provider>,
}

impl ProviderRegistry {
    pub fn new(
        client: reqwest::Client,
        files: Arc<dyn FileManager>,
        notices: NoticeSender,
    ) -> Self {
        Self {
            openai: Box::new(OpenAiProvider::new(
                client.clone(),
                files.clone(),
                notices.clone(),
            )),
            together: Box::new(TogetherProvider::new(client, files, notices)),
        }
    }

    pub fn provider_for(&self, setting: &ProviderSetting) -> &dyn Provider {
        match setting {
            ProviderSetting::OpenAi(_) => self.openai.as_ref(),
            ProviderSetting::TogetherAi(_) => self.together.as_ref(),
        }
    }

    #[cfg(test)]
    pub(crate) fn scripted(openai: Box<dyn Provider>, together: Box<dyn Provider>) -> Self {
        Self { openai, together }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{Message, MessageChunk};
    use crate::core::settings::{Model, ProviderConnection, Settings};
    use crate::provider::{ProviderError, TextGenerationParams};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Provider for Named {
        async fn list_models(&self, _setting: &ProviderSetting) -> Vec<Model> {
            Vec::new()
        }

        async fn generate_text(
            &self,
            _setting: &ProviderSetting,
            _messages: &[Message],
            _params: &TextGenerationParams,
        ) -> Result<MessageChunk, ProviderError> {
            Ok(MessageChunk {
                id: self.0.to_string(),
                model: String::new(),
                choices: Vec::new(),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn dispatch_follows_the_setting_variant() {
        let registry = ProviderRegistry::scripted(Box::new(Named("openai")), Box::new(Named("together")));
        let settings = Settings::default();
        let params = TextGenerationParams::for_model(&Model::chat("m"));

        for setting in &settings.providers {
            let chunk = registry
                .provider_for(setting)
                .generate_text(setting, &[], &params)
                .await
                .unwrap();
            let expected = match setting {
                ProviderSetting::OpenAi(_) => "openai",
                ProviderSetting::TogetherAi(_) => "together",
            };
            assert_eq!(chunk.id, expected);
        }

        // The real constructor wires the concrete backends.
        let (notices, _rx) = NoticeSender::channel();
        let registry = ProviderRegistry::new(
            reqwest::Client::new(),
            Arc::new(crate::files::LocalFileManager::new()),
            notices,
        );
        let custom = ProviderSetting::OpenAi(ProviderConnection {
            id: "local".to_string(),
            enabled: true,
            name: "Local".to_string(),
            models: Vec::new(),
            api_key: String::new(),
            base_url: "http://localhost:1".to_string(),
        });
        let _provider = registry.provider_for(&custom);
    }
}
