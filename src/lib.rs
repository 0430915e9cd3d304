//! Waggle - 智能体编排引擎
//!
//! 一条用户输入依次经过 Planner → Executor → Reporter：
//! 先查回忆缓存，未命中则按规则表生成工具计划，最后经多 provider LLM 电路合成回复并写回缓存。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、构建器、后台周期任务、任务队列执行器、优雅关闭
//! - **llm**: LLM 客户端抽象、OpenAI 兼容实现、限流 / 重试 / 审计与故障转移电路
//! - **memory**: 回忆缓存、短期记忆、持久化任务队列
//! - **observability**: 日志初始化
//! - **pipeline**: 单次请求的状态机（规划规则、计划步骤、汇报合成）
//! - **tools**: Tool 契约、注册表、执行器与内置工具

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod tools;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::{AgentError, Orchestrator};
pub use crate::pipeline::{PipelineResponse, ResponseSource};
