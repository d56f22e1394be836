//! # tcode-core
//!
//! tcode 转码框架核心库, 提供基础类型定义、错误分类和任务选项.
//!
//! 所有其它 tcode crate 都依赖本 crate, 其中的类型不涉及任何 I/O.

pub mod error;
pub mod format_tag;
pub mod frame;
pub mod media_type;
pub mod options;

// 重导出常用类型
pub use error::{TcError, TcResult, ToolFailure, ValidationError};
pub use format_tag::FormatTag;
pub use frame::StreamFrame;
pub use media_type::MediaType;
pub use options::JobOptions;
