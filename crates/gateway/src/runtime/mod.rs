//! Core runtime: per-session cancellation and run locks, and the agent
//! loop itself ([`turn::run_turn`]).

pub mod cancel;
pub mod session_lock;
pub mod turn;

pub use turn::{run_turn, TurnInput};
