//! tablewatch server library.
//!
//! Wires a JSON-lines change feed into a notification hub and keeps a set of
//! logging sessions subscribed to it.

pub mod config;
pub mod error;
pub mod runner;
pub mod session;

pub use config::{Args, ServerConfig};
pub use error::{Error, Result};
pub use runner::{run, RunSummary};
pub use session::SessionView;
