//! 插件注册表.
//!
//! 启动时一次性填充, 之后只读. 编码器和解码器使用独立的名称空间,
//! 因此同名的 `ogg` 编码器与 `ogg` 解码器可以共存.
//!
//! 除按名称查找外, 也可以按格式查找: 同一格式可能有多个插件,
//! 结果按优先顺序排列, 调用方依次尝试直到找到可用的插件.

use std::collections::HashMap;

use tcode_core::{FormatTag, MediaType, TcError, TcResult};

use crate::descriptor::{PluginDescriptor, PluginKind};
use crate::plugin::Plugin;

/// 插件工厂函数类型
pub type PluginFactory = fn() -> TcResult<Box<dyn Plugin>>;

/// 插件注册表
pub struct PluginRegistry {
    /// 编码器映射
    encoders: HashMap<String, PluginEntry>,
    /// 解码器映射
    decoders: HashMap<String, PluginEntry>,
}

/// 注册条目
struct PluginEntry {
    descriptor: PluginDescriptor,
    factory: PluginFactory,
}

impl PluginRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            encoders: HashMap::new(),
            decoders: HashMap::new(),
        }
    }

    fn table(&self, kind: PluginKind) -> &HashMap<String, PluginEntry> {
        match kind {
            PluginKind::Encoder => &self.encoders,
            PluginKind::Decoder => &self.decoders,
        }
    }

    /// 注册一个插件
    ///
    /// 同类插件中已存在同名插件时返回 `DuplicateName`.
    pub fn register(
        &mut self,
        descriptor: PluginDescriptor,
        factory: PluginFactory,
    ) -> TcResult<()> {
        let table = match descriptor.kind() {
            PluginKind::Encoder => &mut self.encoders,
            PluginKind::Decoder => &mut self.decoders,
        };
        if table.contains_key(descriptor.name()) {
            return Err(TcError::DuplicateName(format!(
                "{} '{}'",
                descriptor.kind(),
                descriptor.name()
            )));
        }
        log::debug!(
            "注册插件: {} ({}), 格式 [{}]",
            descriptor.name(),
            descriptor.kind(),
            descriptor.formats_string()
        );
        table.insert(
            descriptor.name().to_string(),
            PluginEntry {
                descriptor,
                factory,
            },
        );
        Ok(())
    }

    /// 按类型和名称查找插件描述
    pub fn resolve(&self, kind: PluginKind, name: &str) -> TcResult<&PluginDescriptor> {
        let key = name.trim().to_ascii_lowercase();
        self.table(kind)
            .get(&key)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| TcError::PluginNotFound(format!("{kind} '{name}'")))
    }

    /// 查找编码器描述
    pub fn resolve_encoder(&self, name: &str) -> TcResult<&PluginDescriptor> {
        self.resolve(PluginKind::Encoder, name)
    }

    /// 查找解码器描述
    pub fn resolve_decoder(&self, name: &str) -> TcResult<&PluginDescriptor> {
        self.resolve(PluginKind::Decoder, name)
    }

    /// 按格式查找插件, 按优先顺序返回
    ///
    /// 排序依据: 该格式在插件格式列表中的位置 (首选格式在前),
    /// 不依赖外部工具的在前, 视频插件在前, 最后按名称.
    pub fn resolve_for_format(
        &self,
        kind: PluginKind,
        format: &FormatTag,
    ) -> Vec<&PluginDescriptor> {
        let mut found: Vec<(usize, &PluginDescriptor)> = self
            .table(kind)
            .values()
            .filter_map(|entry| {
                let desc = &entry.descriptor;
                let rank = desc.supported_formats().iter().position(|f| f == format)?;
                Some((rank, desc))
            })
            .collect();
        found.sort_by(|(ra, a), (rb, b)| {
            ra.cmp(rb)
                .then_with(|| {
                    let tools = |d: &PluginDescriptor| d.required_external_tools().len();
                    tools(a).cmp(&tools(b))
                })
                .then_with(|| {
                    let audio = |d: &PluginDescriptor| d.media_type() == MediaType::Audio;
                    audio(a).cmp(&audio(b))
                })
                .then_with(|| a.name().cmp(b.name()))
        });
        let found: Vec<&PluginDescriptor> = found.into_iter().map(|(_, d)| d).collect();
        log::debug!(
            "格式 {format} 的{kind}: [{}]",
            found.iter().map(|d| d.name()).collect::<Vec<_>>().join(", ")
        );
        found
    }

    /// 创建插件实例
    pub fn create(&self, kind: PluginKind, name: &str) -> TcResult<Box<dyn Plugin>> {
        let key = name.trim().to_ascii_lowercase();
        let entry = self
            .table(kind)
            .get(&key)
            .ok_or_else(|| TcError::PluginNotFound(format!("{kind} '{name}'")))?;
        (entry.factory)()
    }

    /// 按名称排序列出某类插件
    pub fn list(&self, kind: PluginKind) -> Vec<&PluginDescriptor> {
        let mut result: Vec<&PluginDescriptor> =
            self.table(kind).values().map(|e| &e.descriptor).collect();
        result.sort_by(|a, b| a.name().cmp(b.name()));
        result
    }

    /// 已注册的插件总数
    pub fn len(&self) -> usize {
        self.encoders.len() + self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
