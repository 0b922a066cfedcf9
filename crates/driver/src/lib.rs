//! Driver assembly for zwave-host: the node table, interview retries,
//! wake-up handling, the simulated network and the CLI.

pub mod cli;
pub mod driver;
pub mod keys;
pub mod retry;
pub mod sim;
pub mod table;

pub use driver::{Driver, DriverError, InterviewResult};
pub use keys::ConfiguredKeys;
pub use retry::RetryPolicy;
pub use sim::{Scenario, SimulatedNetwork};
pub use table::NodeTable;
