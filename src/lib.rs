//! Selective retry of failed JavaScript/TypeScript tests
//!
//! A failure reporter records failing test names per file during a normal
//! run. A retry session later rewrites each recorded file into a working
//! copy where every other test is commented out, runs only those copies,
//! and repeats up to a bounded number of attempts.

pub mod blocks;
pub mod config;
pub mod error;
pub mod reporter;
pub mod runner;
pub mod session;
pub mod state;
pub mod util;
