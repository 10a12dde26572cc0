//! Agent execution server: reason-act agent loop, tool/MCP invocation,
//! event-bus dispatch, and SSE streaming over a typed REST surface.

pub mod api;
pub mod bootstrap;
pub mod bus;
pub mod orchestrator;
pub mod runtime;
pub mod sse;

pub use orchestrator::Orchestrator;
