#![warn(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

//! Wait until TCP, HTTP and ICMP targets become reachable.

pub use checker::{
    new_checker, CheckError, CheckType, Checker, CheckerConfig, CheckerWithInterval,
};
pub use context::{Context, ContextError};
pub use runner::{run_all, RunError};
pub use wait::{wait_until_ready, Outcome, ReadinessLoop, State, WaitError};

pub mod app;
pub mod checker;
pub mod config;
pub mod context;
pub mod icmp;
pub mod logging;
pub mod runner;
pub mod wait;
