// deepscope-server
//
// The reasoning gateway's outer shell: a line-delimited JSON-RPC 2.0
// service over stdin/stdout exposing the analysis tool surface, plus the
// heuristic analyzers that annotate one-shot analyses.

pub mod analyzers;
pub mod handlers;
pub mod rpc;
pub mod server;
pub mod tools;

pub use handlers::Gateway;
pub use server::{serve, serve_io};
