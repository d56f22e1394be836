//! # tcode
//!
//! 可插拔编解码模块的转码管线框架.
//!
//! 每个编解码插件声明自己的能力 (支持的格式、依赖的外部工具、已知限制),
//! 在任何数据流动之前由校验器检查任务是否可行, 然后由管线按序推动帧
//! 经过插件, 必要时通过外部工具进程处理.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tcode::module::{Job, ToolLocator};
//! use tcode::pipeline::{Pipeline, open_sink, open_source};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> tcode::core::TcResult<()> {
//! let registry = tcode::global_registry()?;
//! let divx = registry.resolve_encoder("divx4")?.clone();
//! let job = Job::new("movie.raw", "movie.avi", divx);
//!
//! let source = open_source(&job)?;
//! let sink = open_sink(&job)?;
//! let summary = Pipeline::new(job, registry, ToolLocator::from_env())?
//!     .run(source, sink, CancellationToken::new())
//!     .await?;
//! println!("写出 {} 帧", summary.frames_out);
//! # Ok(())
//! # }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tcode-core` | 基础类型、错误分类、任务选项 |
//! | `tcode-module` | 插件描述、注册表、校验器、内置插件 |
//! | `tcode-pipeline` | 帧读写、外部工具适配、管线执行 |

use std::sync::OnceLock;

pub mod logging;

/// 基础类型与错误
pub use tcode_core as core;

/// 插件框架
pub use tcode_module as module;

/// 流式管线
pub use tcode_pipeline as pipeline;

use tcode_core::{TcError, TcResult};
use tcode_module::PluginRegistry;

/// 获取 tcode 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置插件的注册表
pub fn default_registry() -> TcResult<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    tcode_module::register_all(&mut registry)?;
    Ok(registry)
}

static GLOBAL_REGISTRY: OnceLock<Result<PluginRegistry, String>> = OnceLock::new();

/// 进程级注册表, 首次调用时初始化, 此后只读
pub fn global_registry() -> TcResult<&'static PluginRegistry> {
    GLOBAL_REGISTRY
        .get_or_init(|| default_registry().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|msg| TcError::Configuration(format!("插件注册失败: {msg}")))
}
