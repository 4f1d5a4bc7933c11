//! 核心模块 - 引擎配置
//!
//! - [`Config`] - 从环境变量加载的引擎配置

pub mod config;

pub use config::Config;
