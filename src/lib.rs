//! `co2-forecast` library crate.
//!
//! The binary (`co2`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fetcher, trainer, service and monitor share one set of types
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod features;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod monitor;
pub mod report;
pub mod serve;
