//! # Maintenance Testing Utils
//!
//! 各个 crate 共享的测试工具：测试数据构建器与外部系统的记录型替身。
//!
//! ```toml
//! [dev-dependencies]
//! maintenance-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
