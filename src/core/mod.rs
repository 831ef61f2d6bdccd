//! Core modules shared by every Hive command: configuration, errors,
//! logging, process execution and experiment identity.

pub mod assets;
pub mod config;
pub mod docs_cli;
pub mod error;
pub mod exec;
pub mod logging;
pub mod output;
pub mod runtime;
pub mod time;
