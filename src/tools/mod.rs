//! 工具箱：能力注册表、调用边界（超时 / 参数校验 / 审计）与内置工具

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;
pub mod search;

pub use echo::EchoTool;
pub use executor::ToolRunner;
pub use filesystem::{FileListTool, FileReadTool, FileWriteTool, SafeFs};
pub use registry::{Tool, ToolRegistry};
pub use schema::validate_args;
pub use search::WebFetchTool;
