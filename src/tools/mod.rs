//! 工具层：Tool 契约、注册表与带超时的执行器（具体工具适配器由外部提供）

pub mod executor;
pub mod registry;

pub use executor::ToolExecutor;
pub use registry::{error_map, Tool, ToolRegistry};
