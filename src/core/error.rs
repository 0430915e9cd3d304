//! 编排层错误类型
//!
//! 只有输入错误会交到调用方；工具失败、provider 失败与缓存读写失败都在各自层内吸收。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// 空白输入，不进入流水线
    #[error("Empty input")]
    EmptyInput,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<regex::Error> for AgentError {
    fn from(e: regex::Error) -> Self {
        AgentError::ConfigError(format!("invalid planner rule: {}", e))
    }
}
