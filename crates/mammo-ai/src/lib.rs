//! mammo-ai: OpenAI-compatible chat completion provider layer
//!
//! This crate talks to a chat-completions endpoint in two ways: a single JSON
//! round trip with tool calling, and a raw server-sent-event stream of text
//! fragments.

pub mod error;
pub mod http;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use http::HttpConfig;
pub use providers::ChatProvider;
pub use stream::TextStream;
pub use types::*;
