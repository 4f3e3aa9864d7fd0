//! Hive - Rust 任务智能体
//!
//! 模块划分：
//! - **agent**: 按配置装配组件，无界面地处理单条请求
//! - **capability**: 子执行器（Tool / Skill / Chain）与执行结果
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复策略、阶段状态、会话监管、命令驱动运行时
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Scripted Mock）、退避重试
//! - **memory**: 上下文日志、压缩归档、快照与预算计量
//! - **observability**: tracing 初始化
//! - **react**: Decision、Planner、Orchestrator 主循环与过程事件
//! - **skills**: 技能定义与目录加载
//! - **tools**: 工具注册表、调用边界与内置工具

pub mod agent;
pub mod capability;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod skills;
pub mod tools;
