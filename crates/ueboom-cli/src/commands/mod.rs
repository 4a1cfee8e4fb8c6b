//! Command implementations for the CLI.

mod alias;
mod devices;
mod power;
mod scan;
mod source_address;
mod watch;

pub use alias::cmd_alias;
pub use devices::cmd_devices;
pub use power::cmd_power;
pub use scan::cmd_scan;
pub use source_address::cmd_source_address;
pub use watch::cmd_watch;
