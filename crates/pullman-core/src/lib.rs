//! Pullman Core - Session based download manager
//!
//! This crate groups download requests into transport sessions by policy,
//! deduplicates concurrent requests for the same resource and tracks each
//! download through a pause/resume/cancel lifecycle with resume data.
//!
//! ```no_run
//! # async fn run() -> Result<(), pullman_core::PullmanError> {
//! use pullman_core::{Manager, ManagerConfig, Request};
//!
//! let manager = Manager::http(ManagerConfig::named("Example"))?;
//! let task = manager.register(Request::parse("https://example.com/file.txt")?, None);
//! let state = task.wait_until_terminal().await;
//! println!("{}", state);
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod fs;
mod ids;
mod queue;
pub mod transport;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use fs::*;
pub use ids::*;
pub use queue::*;

pub use pullman_types::{BackgroundSession, Destination, Progress, Request, ResumeToken, SessionKind};
