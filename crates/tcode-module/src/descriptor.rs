//! 插件能力描述.
//!
//! 每个插件在注册时提供一份静态描述: 名称、类型、支持的格式、依赖的外部工具
//! 和已知限制. 描述构造完成后不可修改, 任务在运行前依据它进行校验.

use std::fmt;

use bitflags::bitflags;
use tcode_core::{FormatTag, MediaType, TcError, TcResult};

/// 插件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// 编码器 (export)
    Encoder,
    /// 解码器 (import)
    Decoder,
}

impl PluginKind {
    /// 机器可读名称
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Decoder => "decoder",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Encoder => "编码器",
            Self::Decoder => "解码器",
        };
        f.pad(name)
    }
}

bitflags! {
    /// 插件特性标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PluginFlags: u32 {
        /// 输出裸码流, 不做容器封装
        const RAW_BITSTREAM = 0x0001;
        /// 实际编解码由外部工具完成
        const EXTERNAL = 0x0002;
    }
}

/// 输入分帧方式 (仅对解码器有意义)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// 按固定字节数切分
    Raw,
    /// 每个 RIFF 风格分块为一帧
    Chunked,
}

/// 外部工具调用描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalInvocation {
    /// 工具名称 (通过 PATH 或覆盖变量解析)
    pub tool: String,
    /// 命令行参数
    pub args: Vec<String>,
}

impl ExternalInvocation {
    /// 创建调用描述
    pub fn new<I, S>(tool: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool: tool.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// 插件能力描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    name: String,
    kind: PluginKind,
    media_type: MediaType,
    version: String,
    description: String,
    /// 第一个为首选格式
    supported_formats: Vec<FormatTag>,
    required_external_tools: Vec<String>,
    known_limitations: Vec<String>,
    accepted_options: Vec<String>,
    flags: PluginFlags,
    framing: Framing,
}

impl PluginDescriptor {
    /// 开始构造描述
    pub fn builder(
        name: impl Into<String>,
        kind: PluginKind,
        media_type: MediaType,
    ) -> PluginDescriptorBuilder {
        PluginDescriptorBuilder {
            inner: PluginDescriptor {
                name: name.into().trim().to_ascii_lowercase(),
                kind,
                media_type,
                version: String::from("0.0.0"),
                description: String::new(),
                supported_formats: Vec::new(),
                required_external_tools: Vec::new(),
                known_limitations: Vec::new(),
                accepted_options: Vec::new(),
                flags: PluginFlags::empty(),
                framing: Framing::Raw,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn supported_formats(&self) -> &[FormatTag] {
        &self.supported_formats
    }

    pub fn required_external_tools(&self) -> &[String] {
        &self.required_external_tools
    }

    pub fn known_limitations(&self) -> &[String] {
        &self.known_limitations
    }

    pub fn accepted_options(&self) -> &[String] {
        &self.accepted_options
    }

    pub fn flags(&self) -> PluginFlags {
        self.flags
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// 是否支持指定格式
    pub fn supports(&self, format: &FormatTag) -> bool {
        self.supported_formats.contains(format)
    }

    /// 首选格式
    pub fn preferred_format(&self) -> Option<&FormatTag> {
        self.supported_formats.first()
    }

    /// 是否接受指定的插件专属选项
    pub fn accepts_option(&self, name: &str) -> bool {
        self.accepted_options.iter().any(|o| o == name)
    }

    /// 是否输出裸码流
    pub fn is_raw_bitstream(&self) -> bool {
        self.flags.contains(PluginFlags::RAW_BITSTREAM)
    }

    /// 以逗号分隔的格式列表
    pub fn formats_string(&self) -> String {
        self.supported_formats
            .iter()
            .map(FormatTag::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// 生成详细说明 (每行一项)
    pub fn describe_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{} ({} {}) v{}", self.name, self.media_type, self.kind, self.version),
            format!("  描述    : {}", self.description),
            format!("  格式    : {}", self.formats_string()),
        ];
        let mut features = Vec::new();
        if self.flags.contains(PluginFlags::RAW_BITSTREAM) {
            features.push("裸码流");
        }
        if self.flags.contains(PluginFlags::EXTERNAL) {
            features.push("外部工具");
        }
        if !features.is_empty() {
            lines.push(format!("  特性    : {}", features.join(" ")));
        }
        if !self.required_external_tools.is_empty() {
            lines.push(format!(
                "  依赖工具: {}",
                self.required_external_tools.join(", ")
            ));
        }
        if !self.accepted_options.is_empty() {
            lines.push(format!("  选项    : {}", self.accepted_options.join(", ")));
        }
        for (i, note) in self.known_limitations.iter().enumerate() {
            lines.push(format!("  限制 #{}: {note}", i + 1));
        }
        lines
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:<4} {:<6} [{}] {}",
            self.name,
            self.media_type,
            self.kind,
            self.formats_string(),
            self.description
        )
    }
}

/// 插件描述构造器
#[derive(Debug)]
pub struct PluginDescriptorBuilder {
    inner: PluginDescriptor,
}

impl PluginDescriptorBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.inner.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.inner.description = description.into();
        self
    }

    /// 添加支持的格式, 重复的格式会被忽略
    pub fn format(mut self, tag: &str) -> Self {
        let tag = FormatTag::new(tag);
        if !self.inner.supported_formats.contains(&tag) {
            self.inner.supported_formats.push(tag);
        }
        self
    }

    /// 添加依赖的外部工具, 并标记为外部插件
    pub fn requires_tool(mut self, tool: impl Into<String>) -> Self {
        self.inner.required_external_tools.push(tool.into());
        self.inner.flags |= PluginFlags::EXTERNAL;
        self
    }

    pub fn limitation(mut self, note: impl Into<String>) -> Self {
        self.inner.known_limitations.push(note.into());
        self
    }

    pub fn option(mut self, name: impl Into<String>) -> Self {
        self.inner.accepted_options.push(name.into());
        self
    }

    pub fn flags(mut self, flags: PluginFlags) -> Self {
        self.inner.flags |= flags;
        self
    }

    pub fn framing(mut self, framing: Framing) -> Self {
        self.inner.framing = framing;
        self
    }

    /// 完成构造
    ///
    /// 名称为空或未声明任何格式时返回配置错误.
    pub fn build(self) -> TcResult<PluginDescriptor> {
        let desc = self.inner;
        if desc.name.is_empty() {
            return Err(TcError::Configuration("插件名称不能为空".into()));
        }
        if desc.supported_formats.iter().any(|f| f.as_str().is_empty()) {
            return Err(TcError::Configuration(format!(
                "插件 '{}' 声明了空的格式标识",
                desc.name
            )));
        }
        if desc.supported_formats.is_empty() {
            return Err(TcError::Configuration(format!(
                "插件 '{}' 未声明任何支持的格式",
                desc.name
            )));
        }
        Ok(desc)
    }
}
