//! Ports: trait seams for the external collaborators the core consumes.

pub mod agent_registry;
pub mod driver;
pub mod routing;
pub mod session_store;

pub use agent_registry::{AgentRegistry, ProjectTotals};
pub use driver::{AgentDriver, DriverReply, DriverRequest, ToolUse};
pub use routing::RoutingProvider;
pub use session_store::SessionStore;
