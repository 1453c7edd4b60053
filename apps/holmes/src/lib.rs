//! Headless HOLMES dashboard client.
//!
//! [`app`] holds the dashboard program (state, events, update rules),
//! [`render`] the log-based view and [`input`] the line-oriented input
//! reader. Everything runs on the `holmes-runtime` dispatch loop with
//! `holmes-link` connections.

pub mod app;
pub mod config;
pub mod input;
pub mod render;
pub mod telemetry;
