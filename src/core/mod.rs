pub mod connection;
pub mod protocol;
pub mod registry;
pub mod router;

pub use connection::{Connection, ConnectionState, ToolDescriptor};
pub use registry::{InstanceStatus, Registry};
pub use router::{Router, RouterSession, ToolResult};
