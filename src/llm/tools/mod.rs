mod tool;

pub use tool::{FunctionDescriptor, LlmTool, ToolDescriptor};
