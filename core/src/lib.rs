//! Shared types for the VRM MCP server: the operation catalog, closed-world
//! argument validation and the uniform response envelope.

pub mod envelope;
pub mod error;
pub mod tools;
pub mod validate;

pub use envelope::{Envelope, ErrorDescriptor, Meta};
pub use error::{ErrorKind, ValidationError};
pub use tools::{Behavior, Endpoint, FieldRole, ToolSpec, TOOLS, find_tool};
pub use validate::{ArgValue, ValidatedArgs, validate};
