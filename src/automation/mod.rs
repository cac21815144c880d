//! The scan loop and its run entry point.
//!
//! This module provides:
//! - `CancelToken` and the OS stop hooks (kill-switch corner, Ctrl+C, hotkey)
//! - The Scanning / IdleWait / Stopped state machine
//! - `run()`, which maps the outcome to a process exit status

pub mod cancel;
pub mod runner;
pub mod state;

pub use cancel::CancelToken;
pub use runner::{run, ExitStatus};
