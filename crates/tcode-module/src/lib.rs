//! # tcode-module
//!
//! tcode 插件框架: 插件能力描述、注册表、任务校验与内置插件.
//!
//! ## 内置插件
//!
//! - **解码器 (import)**: raw, pcm, divx4, ogg (依赖 oggdec)
//! - **编码器 (export)**: raw, pcm, null, divx4, divx4raw, ogg (依赖 oggenc)
//!
//! ## 使用示例
//!
//! ```rust
//! use tcode_module::{PluginKind, PluginRegistry};
//!
//! let mut reg = PluginRegistry::new();
//! tcode_module::register_all(&mut reg).unwrap();
//!
//! let desc = reg.resolve(PluginKind::Encoder, "divx4").unwrap();
//! assert!(desc.supports(&"DIVX".parse().unwrap()));
//! ```

pub mod chunk;
pub mod descriptor;
pub mod job;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod tools;
pub mod validate;

// 重导出常用类型
pub use descriptor::{ExternalInvocation, Framing, PluginDescriptor, PluginFlags, PluginKind};
pub use job::Job;
pub use plugin::Plugin;
pub use registry::{PluginFactory, PluginRegistry};
pub use tools::ToolLocator;
pub use validate::validate;

use tcode_core::TcResult;

/// 注册所有内置插件
pub fn register_all(registry: &mut PluginRegistry) -> TcResult<()> {
    plugins::register_all_decoders(registry)?;
    plugins::register_all_encoders(registry)?;
    Ok(())
}
