// ABOUTME: LLM module - client abstraction for language model providers.
// ABOUTME: Defines types, the ChatModel trait, and the Anthropic implementation.

mod anthropic;
mod client;
mod stream_accumulator;
mod types;

pub use anthropic::AnthropicClient;
pub use client::*;
pub use stream_accumulator::StreamAccumulator;
pub use types::*;
