//! cachevisor core - platform-independent supervision of an embedded executable
//!
//! This crate provides payload staging, argument assembly, output relaying,
//! the process traits implemented by the platform crates, and the
//! [`ProcessSupervisor`] that ties them together.

mod arguments;
mod config;
mod error;
mod output;
mod process;
mod staging;
mod supervisor;

#[cfg(test)]
mod log_capture;

pub use arguments::*;
pub use config::*;
pub use error::*;
pub use output::*;
pub use process::*;
pub use staging::*;
pub use supervisor::*;
