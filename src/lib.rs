//! # Study Assistant Telegram Bot
//!
//! A Telegram bot that helps students with AI tools: questions with conversation
//! context, OCR and exercise solving from photos, image editing and generation,
//! translation, search and equation solving. Every remote AI call goes through a
//! retrying, falling-back invocation layer, and every user interaction runs
//! through a per-session state machine.

pub mod bot;
pub mod circuit_breaker;
pub mod config;
pub mod document;
pub mod errors;
pub mod localization;
pub mod quota;
pub mod rate_limit;
pub mod remote;
pub mod session;
pub mod store;
