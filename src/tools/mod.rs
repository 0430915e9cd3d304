//! 工具层：Tool 契约、注册表、执行器与内置工具

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod search;

use std::path::Path;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filesystem::{CollectImagesTool, ListDirectoryTool};
pub use registry::{Tool, ToolRegistry};
pub use search::WebSearchTool;

use crate::config::ToolsSection;

/// 注册内置工具：echo / list_directory / collect_images / web_search
pub fn builtin_registry(config: &ToolsSection) -> ToolRegistry {
    let base = config
        .workspace_root
        .clone()
        .unwrap_or_else(|| Path::new(".").to_path_buf());
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(ListDirectoryTool::new(&base));
    registry.register(CollectImagesTool::new(&base));
    registry.register(WebSearchTool::new(&config.search));
    registry
}
