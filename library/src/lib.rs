//! Retrohost launcher library
//!
//! Command implementations and the headless front end used by the
//! `retrohost` binary.

pub mod commands;
pub mod headless;
