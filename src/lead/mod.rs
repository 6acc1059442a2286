// ABOUTME: Lead module - the outer research loop.
// ABOUTME: Controller, bounded-parallel dispatcher, and prompt templates.

mod controller;
mod dispatch;
pub mod prompts;

pub use controller::LeadController;
pub use dispatch::SubagentDispatcher;
