/// Model Context Protocol surface: JSON-RPC 2.0 over stdio.
///
/// - `protocol`: wire types.
/// - `server`: the request loop; dispatches `tools/*` to a `ToolRegistry`.

pub mod protocol;
pub mod server;

pub use server::McpServer;
