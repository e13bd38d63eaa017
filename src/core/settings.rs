use serde::{Deserialize, Deserializer, Serialize};

/// What a model is for, per the provider's metadata. Decoding is lenient:
/// unrecognized strings map to [`ModelType::Unknown`] so new provider
/// categories never break model-list parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Chat,
    Embedding,
    Audio,
    Image,
    Unknown,
}

impl<'de> Deserialize<'de> for ModelType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "chat" => ModelType::Chat,
            "embedding" => ModelType::Embedding,
            "audio" => ModelType::Audio,
            "image" => ModelType::Image,
            _ => ModelType::Unknown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

fn default_modalities() -> Vec<Modality> {
    vec![Modality::Text]
}

/// A model as advertised by a provider's metadata endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "type", default)]
    pub kind: ModelType,
    #[serde(default = "default_modalities")]
    pub input_modalities: Vec<Modality>,
}

impl Model {
    pub fn chat(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            kind: ModelType::Chat,
            input_modalities: default_modalities(),
        }
    }
}

/// Connection details shared by every provider variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConnection {
    pub id: String,
    pub enabled: bool,
    pub name: String,
    pub models: Vec<Model>,
    pub api_key: String,
    pub base_url: String,
}

/// The closed set of configured providers. Adding a backend means adding a
/// variant here and an arm in the registry; there is no open registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProviderSetting {
    #[serde(rename = "openai")]
    OpenAi(ProviderConnection),
    #[serde(rename = "together_ai")]
    TogetherAi(ProviderConnection),
}

impl ProviderSetting {
    pub fn connection(&self) -> &ProviderConnection {
        match self {
            ProviderSetting::OpenAi(connection) | ProviderSetting::TogetherAi(connection) => {
                connection
            }
        }
    }

    fn connection_mut(&mut self) -> &mut ProviderConnection {
        match self {
            ProviderSetting::OpenAi(connection) | ProviderSetting::TogetherAi(connection) => {
                connection
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.connection().id
    }

    pub fn name(&self) -> &str {
        &self.connection().name
    }

    pub fn enabled(&self) -> bool {
        self.connection().enabled
    }

    pub fn models(&self) -> &[Model] {
        &self.connection().models
    }

    pub fn add_model(mut self, model: Model) -> Self {
        self.connection_mut().models.push(model);
        self
    }

    pub fn edit_model(mut self, model: Model) -> Self {
        for slot in &mut self.connection_mut().models {
            if slot.id == model.id {
                *slot = model.clone();
            }
        }
        self
    }

    pub fn del_model(mut self, model_id: &str) -> Self {
        self.connection_mut().models.retain(|m| m.id != model_id);
        self
    }
}

/// User-facing configuration consumed by the pipeline. Durable storage of
/// this value belongs to the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub chat_model_id: String,
    #[serde(default)]
    pub title_model_id: String,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderSetting>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chat_model_id: String::new(),
            title_model_id: String::new(),
            providers: default_providers(),
        }
    }
}

fn default_providers() -> Vec<ProviderSetting> {
    vec![
        ProviderSetting::TogetherAi(ProviderConnection {
            id: "togetherai".to_string(),
            enabled: true,
            name: "Together AI".to_string(),
            models: Vec::new(),
            api_key: String::new(),
            base_url: "https://api.together.xyz/v1".to_string(),
        }),
        ProviderSetting::OpenAi(ProviderConnection {
            id: "openai".to_string(),
            enabled: true,
            name: "OpenAI".to_string(),
            models: Vec::new(),
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
        }),
    ]
}

impl Settings {
    pub fn find_model_by_id(&self, model_id: &str) -> Option<&Model> {
        if model_id.is_empty() {
            return None;
        }
        self.providers
            .iter()
            .flat_map(|provider| provider.models().iter())
            .find(|model| model.id == model_id)
    }

    pub fn find_provider_for_model(&self, model_id: &str) -> Option<&ProviderSetting> {
        self.providers
            .iter()
            .find(|provider| provider.models().iter().any(|model| model.id == model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_model(model_id: &str) -> Settings {
        let mut settings = Settings::default();
        let provider = settings.providers[0].clone().add_model(Model::chat(model_id));
        settings.providers[0] = provider;
        settings.chat_model_id = model_id.to_string();
        settings
    }

    #[test]
    fn model_lookup_walks_all_providers() {
        let settings = settings_with_model("meta-llama/Llama-3-8b");
        assert!(settings.find_model_by_id("meta-llama/Llama-3-8b").is_some());
        assert!(settings.find_model_by_id("missing").is_none());
        assert!(settings.find_model_by_id("").is_none());

        let provider = settings
            .find_provider_for_model("meta-llama/Llama-3-8b")
            .expect("provider owning the model");
        assert_eq!(provider.id(), "togetherai");
    }

    #[test]
    fn provider_settings_are_tagged_by_type() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings.providers).unwrap();
        assert!(json.contains(r#""type":"together_ai""#));
        assert!(json.contains(r#""type":"openai""#));

        let back: Vec<ProviderSetting> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings.providers);
    }

    #[test]
    fn model_type_decoding_is_lenient() {
        let model: Model =
            serde_json::from_str(r#"{"id":"m1","display_name":"M1","type":"reranker"}"#).unwrap();
        assert_eq!(model.kind, ModelType::Unknown);

        let chat: Model = serde_json::from_str(r#"{"id":"m2","type":"CHAT"}"#).unwrap();
        assert_eq!(chat.kind, ModelType::Chat);
        assert_eq!(chat.input_modalities, vec![Modality::Text]);
    }

    #[test]
    fn model_edits_are_by_id() {
        let provider = ProviderSetting::OpenAi(ProviderConnection {
            id: "openai".to_string(),
            enabled: true,
            name: "OpenAI".to_string(),
            models: vec![Model::chat("a"), Model::chat("b")],
            api_key: String::new(),
            base_url: String::new(),
        });

        let mut renamed = Model::chat("a");
        renamed.display_name = "Alpha".to_string();
        let provider = provider.edit_model(renamed);
        assert_eq!(provider.models()[0].display_name, "Alpha");

        let provider = provider.del_model("b");
        assert_eq!(provider.models().len(), 1);
    }
}
