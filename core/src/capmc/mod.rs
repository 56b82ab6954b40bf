//! Driving the capmc power-control command.
//!
//! `runner` executes one capmc invocation with merged output capture and a
//! hard timeout; `classify` maps its result to success / transient / fatal;
//! `controller` sequences the configure and reboot operations with retry;
//! `poller` watches node_status until every targeted node reports "on".

pub mod classify;
pub mod controller;
pub mod poller;
pub mod runner;

pub use classify::{classify, Disposition, Operation};
pub use controller::{FatalError, PowerConfig, PowerController, RetryPolicy};
pub use poller::ConvergencePoller;
pub use runner::{CapmcRunner, CommandRunner, MockRunner, ScriptResult};
