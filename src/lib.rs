//! Causerie is the conversation engine of a chat client for remote LLM APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the message model and chunk folding, settings and model
//!   selection, the generation handler, and the per-conversation controller
//!   that drives send/edit/regenerate/cancel and title generation.
//! - [`provider`] defines the `Provider` contract and the HTTP backends that
//!   translate the common message model to and from each API's wire format.
//! - [`api`] defines request/response payloads and parsing helpers shared by
//!   provider code.
//! - [`storage`] persists conversations through the repository interface.
//! - [`files`] resolves local image references for upload and cleans up
//!   orphaned files.
//!
//! There is no binary: a presentation layer constructs a
//! [`provider::registry::ProviderRegistry`] and a repository, hands both to a
//! [`core::chat::ChatController`], and observes the transcript and error
//! channels it returns.

pub mod api;
pub mod core;
pub mod files;
pub mod logging;
pub mod provider;
pub mod storage;
