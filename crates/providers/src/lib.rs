//! Chat model implementations for snak.
//!
//! Models implement `snak_core::ChatModel`; the selector picks a tier
//! per request.

pub mod openai_compat;
pub mod selector;

pub use openai_compat::{OpenAiCompatModel, OpenAiEndpoint};
pub use selector::{StaticModelSelector, build_from_config};
