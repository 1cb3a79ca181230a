//! # spice-viewer
//!
//! Command-line embedding of `spice-core`: loads a TOML config, sets up
//! logging, links the main, display and inputs channels, and writes each
//! finished frame to a BMP file until Ctrl-C or the server ends the
//! session.

pub mod config;
pub mod dump;
pub mod logging;
