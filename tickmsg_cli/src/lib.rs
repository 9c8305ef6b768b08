//! Command-line echo server and client built on `libtickmsg`.

pub mod config;
pub mod echo;
pub mod error;
pub mod ping;
pub mod settings;
