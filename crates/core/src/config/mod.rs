//! 维护服务配置
//!
//! 配置按以下顺序加载：
//! 1. 内置默认值
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `MAINTENANCE__`，层级分隔符 `__`）

pub mod models;

pub use models::*;
