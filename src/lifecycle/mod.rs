//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every subscriber wakes → server stops accepting → drain → exit
//! ```
//!
//! # Design Decisions
//! - One broadcast coordinator; any task can subscribe or trigger
//! - Triggering twice is harmless

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_listener, wait_for_signal};
