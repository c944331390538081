//! Terminal chat client for the OpenAI Responses API with vector-store retrieval.

pub mod ai_sdk;
pub mod bridge;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod payload;
pub mod pricing;
pub mod protocol;
pub mod retry;
pub mod stream;
pub mod ui;
