// ABOUTME: Tool module - defines tools, registry, and the invocation choke point.
// ABOUTME: Core abstraction for agent capabilities.

mod invoker;
mod registry;
mod result;
mod traits;

pub use invoker::Invoker;
pub use registry::Registry;
pub use result::ToolResult;
pub use traits::Tool;
