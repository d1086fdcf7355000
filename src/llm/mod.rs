pub mod client;
pub mod error;
pub mod types;

pub use client::{ChatClient, ChatSender};
pub use error::ApiError;
pub use types::{ChatMessage, ChatRequest};
