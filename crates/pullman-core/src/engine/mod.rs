//! Download Engine - manager, sessions and tasks
//!
//! - `Manager` categorises requests into sessions by kind
//! - `Session` deduplicates requests into tasks and routes transport events
//! - `Task` drives the per-download state machine

mod manager;
mod session;
mod state;
mod task;

pub use manager::*;
pub use session::*;
pub use state::*;
pub use task::*;
