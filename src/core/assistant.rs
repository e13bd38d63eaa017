use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An assistant persona: optional system prompt and sampling temperature.
///
/// The generation handler injects the system prompt when a persona is
/// supplied; the default controller wiring passes none, but the seam stays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub temperature: f32,
}

impl Default for Assistant {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: String::new(),
            system_prompt: String::new(),
            temperature: 0.6,
        }
    }
}
