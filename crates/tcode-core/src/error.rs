//! 统一错误类型定义.
//!
//! 错误按处理阶段分类:
//! - 配置错误 (插件名、选项): 在触碰输出文件之前立即返回
//! - 校验错误 (格式/能力不匹配): 同上
//! - 外部工具错误 / 管线错误: 中止当前任务, 清理部分输出, 并报告最后完成的帧序号
//!
//! 转码失败不视为瞬时错误, 框架内不做任何自动重试.

use std::time::Duration;

use thiserror::Error;

use crate::format_tag::FormatTag;

/// 命令行退出码: 配置错误
pub const EXIT_CONFIGURATION: i32 = 2;
/// 命令行退出码: 校验错误
pub const EXIT_VALIDATION: i32 = 3;
/// 命令行退出码: 管线错误
pub const EXIT_PIPELINE: i32 = 4;
/// 命令行退出码: 外部工具错误
pub const EXIT_EXTERNAL_TOOL: i32 = 5;

/// tcode 统一错误类型
#[derive(Debug, Error)]
pub enum TcError {
    /// 同类插件中已存在相同名称
    #[error("插件名称重复: {0}")]
    DuplicateName(String),

    /// 未找到指定插件
    #[error("未找到插件: {0}")]
    PluginNotFound(String),

    /// 配置错误 (错误的插件名、选项格式等)
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 任务校验失败
    #[error("校验失败: {0}")]
    Validation(#[from] ValidationError),

    /// 外部辅助工具失败
    #[error("外部工具 '{tool}' 失败: {failure} (最后完成帧: {})", fmt_last(.last_successful))]
    ExternalTool {
        /// 工具名称
        tool: String,
        /// 失败原因
        failure: ToolFailure,
        /// 失败前最后一个成功处理的帧序号
        last_successful: Option<u64>,
    },

    /// 帧级别失败
    #[error("管线错误: {reason} (最后完成帧: {})", fmt_last(.last_successful))]
    Pipeline {
        /// 失败前最后一个成功处理的帧序号
        last_successful: Option<u64>,
        /// 失败原因
        reason: String,
    },

    /// 任务在帧之间被取消
    #[error("任务已取消 (最后完成帧: {})", fmt_last(.last_successful))]
    Cancelled {
        /// 取消前最后一个成功处理的帧序号
        last_successful: Option<u64>,
    },

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 无效数据 (损坏的分块等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 插件不支持该操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),
}

/// 任务校验错误
///
/// 在任何流 I/O 开始之前产生.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// 插件不支持请求的输出格式
    #[error("插件 '{plugin}' 不支持格式 {format} (支持: {supported})")]
    UnsupportedFormat {
        plugin: String,
        format: FormatTag,
        supported: String,
    },

    /// 插件依赖的外部工具在本机不可用
    #[error("插件 '{plugin}' 需要外部工具 '{tool}', 但在 PATH 中未找到")]
    MissingTool { plugin: String, tool: String },

    /// 同时设置了互斥的选项
    #[error("选项 '{first}' 与 '{second}' 互斥")]
    ConflictingOptions { first: String, second: String },

    /// 输入插件无法与输出插件串联
    #[error("插件 '{import}' 无法串联到 '{export}': {reason}")]
    IncompatibleChain {
        import: String,
        export: String,
        reason: String,
    },

    /// 裸码流导出携带音频时必须单独指定音频输出
    #[error("插件 '{plugin}' 输出裸码流, 音频必须导出到单独的文件 (--raw-audio)")]
    MissingRawAudio { plugin: String },
}

/// 外部工具失败原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolFailure {
    /// 工具不存在
    #[error("工具不存在")]
    NotFound,

    /// 启动进程失败
    #[error("启动失败: {0}")]
    Spawn(String),

    /// 进程以非零状态退出
    #[error("退出状态异常: {}", fmt_status(.0))]
    ExitStatus(Option<i32>),

    /// 在限定时间内没有输出
    #[error("超过 {} ms 无响应", .0.as_millis())]
    Timeout(Duration),

    /// 进程正常退出但没有产生任何输出
    #[error("没有产生任何输出")]
    NoOutput,

    /// 管道读写失败
    #[error("管道 I/O 失败: {0}")]
    Io(String),
}

/// tcode 统一 Result 类型
pub type TcResult<T> = Result<T, TcError>;

impl TcError {
    /// 构造帧级别管线错误
    pub fn pipeline(last_successful: Option<u64>, reason: impl Into<String>) -> Self {
        Self::Pipeline {
            last_successful,
            reason: reason.into(),
        }
    }

    /// 构造外部工具错误 (尚未关联帧序号)
    pub fn external_tool(tool: impl Into<String>, failure: ToolFailure) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            failure,
            last_successful: None,
        }
    }

    /// 错误对应的命令行退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DuplicateName(_) | Self::PluginNotFound(_) | Self::Configuration(_) => {
                EXIT_CONFIGURATION
            }
            Self::Validation(_) => EXIT_VALIDATION,
            Self::ExternalTool { .. } => EXIT_EXTERNAL_TOOL,
            Self::Pipeline { .. }
            | Self::Cancelled { .. }
            | Self::Io(_)
            | Self::InvalidData(_)
            | Self::Unsupported(_) => EXIT_PIPELINE,
        }
    }

    /// 失败前最后一个成功处理的帧序号 (如果有)
    pub fn last_successful(&self) -> Option<u64> {
        match self {
            Self::ExternalTool {
                last_successful, ..
            }
            | Self::Pipeline {
                last_successful, ..
            }
            | Self::Cancelled { last_successful } => *last_successful,
            _ => None,
        }
    }

    /// 将帧级失败归一为中止任务的错误
    ///
    /// 外部工具错误保持原分类并补充帧序号; 其余运行期错误归入管线错误.
    /// 配置与校验错误原样返回.
    pub fn into_job_failure(self, last_successful: Option<u64>) -> Self {
        match self {
            Self::ExternalTool { tool, failure, .. } => Self::ExternalTool {
                tool,
                failure,
                last_successful,
            },
            Self::Cancelled { .. } => Self::Cancelled { last_successful },
            Self::Pipeline { reason, .. } => Self::Pipeline {
                last_successful,
                reason,
            },
            Self::Io(e) => Self::pipeline(last_successful, format!("I/O 错误: {e}")),
            Self::InvalidData(msg) => Self::pipeline(last_successful, format!("无效数据: {msg}")),
            Self::Unsupported(msg) => {
                Self::pipeline(last_successful, format!("不支持的操作: {msg}"))
            }
            other => other,
        }
    }
}

fn fmt_last(last: &Option<u64>) -> String {
    match last {
        Some(n) => n.to_string(),
        None => "无".to_string(),
    }
}

fn fmt_status(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "被信号终止".to_string(),
    }
}
