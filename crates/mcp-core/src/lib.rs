pub mod handler;
pub mod protocol;
pub mod tool;
pub use handler::{ToolError, ToolResult};
pub use protocol::JsonObject;
pub use tool::{ArgumentsExt, ParamKind, ParamSpec, ToolSpec};
