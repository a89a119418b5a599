//! Tool functions the generation backend may invoke mid-turn.

pub mod arguments;
pub mod phone;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use phone::{phone_check_tool, PhoneNumberChecker, PhoneCheck};
pub use tool::{FnTool, Tool, ToolContext};
pub use types::{ParameterBuilder, ToolParameters};
pub use validation::validate_arguments;
