#[macro_use]
extern crate scopeguard;

pub mod config;
pub mod linux;
pub mod process;

pub use config::Config;
pub use process::{ProcessStatus, WaitOutcome};
