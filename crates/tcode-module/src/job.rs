//! 转码任务.
//!
//! 一个 `Job` 对应一次从输入到输出的转码调用, 运行结束后即被消耗.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tcode_core::options::{OPT_FORMAT, OPT_FRAME_SIZE, OPT_KEEP_PARTIAL, OPT_TOOL_TIMEOUT_MS};
use tcode_core::{FormatTag, JobOptions, MediaType, TcError, TcResult};

use crate::descriptor::PluginDescriptor;

/// 原始输入默认分帧大小 (4 KB)
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// 外部工具默认空闲超时
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// 转码任务
#[derive(Debug, Clone)]
pub struct Job {
    /// 输入文件
    pub input_path: PathBuf,
    /// 输出文件
    pub output_path: PathBuf,
    /// 主插件 (决定输出格式)
    pub selected_plugin: PluginDescriptor,
    /// 串联在主插件之前的解码器
    pub import_plugin: Option<PluginDescriptor>,
    /// 音频单独导出的路径
    pub raw_audio_path: Option<PathBuf>,
    /// 任务选项
    pub options: JobOptions,
}

impl Job {
    /// 创建任务
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        selected_plugin: PluginDescriptor,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            selected_plugin,
            import_plugin: None,
            raw_audio_path: None,
            options: JobOptions::new(),
        }
    }

    pub fn with_import(mut self, import_plugin: PluginDescriptor) -> Self {
        self.import_plugin = Some(import_plugin);
        self
    }

    pub fn with_raw_audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw_audio_path = Some(path.into());
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// 请求的输出格式
    ///
    /// 优先级: `format=` 选项 > 输出文件扩展名 > 插件首选格式.
    pub fn requested_format(&self) -> TcResult<FormatTag> {
        if let Some(tag) = self.options.get(OPT_FORMAT) {
            return tag.parse();
        }
        if let Some(tag) = FormatTag::from_path(self.effective_output_path()) {
            return Ok(tag);
        }
        self.selected_plugin
            .preferred_format()
            .cloned()
            .ok_or_else(|| {
                TcError::Configuration(format!(
                    "无法确定插件 '{}' 的输出格式",
                    self.selected_plugin.name()
                ))
            })
    }

    /// 实际写入的输出路径
    ///
    /// 音频插件指定了 `raw_audio_path` 时写入该路径 (音频单独导出).
    pub fn effective_output_path(&self) -> &Path {
        match (&self.raw_audio_path, self.selected_plugin.media_type()) {
            (Some(path), MediaType::Audio) => path,
            _ => &self.output_path,
        }
    }

    /// 原始输入的分帧大小
    pub fn frame_size(&self) -> TcResult<usize> {
        match self.options.get_u32(OPT_FRAME_SIZE)? {
            Some(0) => Err(TcError::Configuration("frame_size 不能为 0".into())),
            Some(size) => Ok(size as usize),
            None => Ok(DEFAULT_FRAME_SIZE),
        }
    }

    /// 失败时是否保留部分输出
    pub fn keep_partial(&self) -> TcResult<bool> {
        self.options.flag(OPT_KEEP_PARTIAL)
    }

    /// 外部工具空闲超时
    pub fn tool_timeout(&self) -> TcResult<Duration> {
        match self.options.get_duration_ms(OPT_TOOL_TIMEOUT_MS)? {
            Some(d) if d.is_zero() => Err(TcError::Configuration(
                "tool_timeout_ms 不能为 0".into(),
            )),
            Some(d) => Ok(d),
            None => Ok(DEFAULT_TOOL_TIMEOUT),
        }
    }

    /// 按处理顺序排列的插件描述 (导入解码器在前)
    pub fn plugin_chain(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.import_plugin.iter().chain(std::iter::once(&self.selected_plugin))
    }
}
