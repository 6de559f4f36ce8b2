pub mod add_numbers_tool;
pub mod calculator_tool;
pub mod current_datetime_tool;
pub mod dispatcher;
pub mod echo_tool;
mod tool;

pub use add_numbers_tool::AddNumbersTool;
pub use calculator_tool::CalculatorTool;
pub use current_datetime_tool::CurrentDatetimeTool;
pub use dispatcher::{Resolution, ToolDispatcher, ToolId, ERROR_PREFIX, FINISH};
pub use echo_tool::EchoTool;
pub(crate) use tool::string_arg;
pub use tool::{FnTool, FunctionDescriptor, Tool, ToolDescriptor};
