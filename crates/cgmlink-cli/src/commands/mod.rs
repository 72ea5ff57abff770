//! Command implementations for the CLI.

mod config;
mod demo;
mod pairing;
mod readings;
mod scan;

pub use config::cmd_config;
pub use demo::{DemoOutput, cmd_demo};
pub use pairing::cmd_pairing;
pub use readings::{ReadingsContext, cmd_readings};
pub use scan::cmd_scan;
