use std::sync::Arc;

use crate::core::message::Message;
use crate::core::settings::Model;

/// A pure rewrite applied to the outbound message list before it reaches a
/// provider (persona injection, context trimming, and the like).
pub trait MessageTransformer: Send + Sync {
    fn transform(&self, messages: Vec<Message>, model: &Model) -> Vec<Message>;
}

/// Apply transformers in order, each seeing the previous one's output.
pub fn apply_transformers(
    messages: Vec<Message>,
    transformers: &[Arc<dyn MessageTransformer>],
    model: &Model,
) -> Vec<Message> {
    transformers
        .iter()
        .fold(messages, |acc, transformer| transformer.transform(acc, model))
}
