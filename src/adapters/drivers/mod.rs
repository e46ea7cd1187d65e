//! Agent driver adapters.

pub mod command;
pub mod mock;

pub use command::{CommandDriver, CommandDriverConfig};
pub use mock::{MockDriver, MockScript};
