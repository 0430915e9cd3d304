//! Echo 工具：原样返回 text，缺少 text 时报错（便于演练工具失败路径）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged. Args: {\"text\": \"message\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        args.get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| "Missing text".to_string())
    }
}
