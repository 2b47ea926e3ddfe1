//! Command handlers: bridge CLI args to the live-sync engine and output
//! formatting.

pub mod config_cmd;
pub mod decode;
pub mod fetch;
pub mod watch;
