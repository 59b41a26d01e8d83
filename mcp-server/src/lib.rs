pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

// Re-export commonly used items
pub use config::{Cli, LogFormat, ServerConfig, Transport};
pub use dispatcher::Dispatcher;
pub use error::{RpcError, ToolError};
pub use lifecycle::{ConnectionManager, LifecycleConfig};
pub use server::McpServer;
pub use tools::{Tool, ToolContext, ToolRegistry};
