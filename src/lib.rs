//! `hfs-fit` library crate.
//!
//! The binary (`hfsfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - modules are reusable (e.g., notebooks, future daemons)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod mcmc;
pub mod models;
pub mod params;
pub mod plot;
pub mod report;
