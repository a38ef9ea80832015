//! dnfstage - stage package changes and apply them through dnfdaemon
//!
//! This library exposes the core modules for use by the binaries and tests.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod dbus;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod progress;
pub mod queue;
pub mod search;
pub mod types;
pub mod ui;
