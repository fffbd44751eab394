//! Remote AI capabilities and the resilient invocation layer over them
//!
//! - `capability`: the capability seam and shared result validation
//! - `http`: form/JSON/query HTTP endpoints of the provider
//! - `text`: text, OCR and search body normalization
//! - `translate`, `books`: dedicated third-party adapters
//! - `invoker`: retry, timeout and fallback over a capability chain
//! - `catalog`: the chains the bot uses, built from configuration
//! - `moderation`: profanity classification on top of the text capability

pub mod books;
pub mod capability;
pub mod catalog;
pub mod http;
pub mod invoker;
pub mod moderation;
pub mod text;
pub mod translate;

pub use capability::{CapabilityRequest, RemoteCapability};
pub use catalog::Catalog;
pub use invoker::ResilientInvoker;
