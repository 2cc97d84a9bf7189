//! Line-delimited JSON-RPC 2.0 transport over stdio.

pub mod server;

pub use server::{RpcFailure, RpcServer, ToolDefinition, ToolHandler, PROTOCOL_VERSION};
