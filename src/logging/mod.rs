//! 日志子系统.
//!
//! 双输出:
//! - 控制台 (stderr): 默认 warn, 由 -v/-vv 提升, 终端下彩色
//! - 文件: 无色, 默认 info, `TCODE_LOG` 环境变量可覆盖过滤规则
//!
//! 日志文件为 `<目录>/<前缀>.<YYYY-MM-DD>.log`, 每日零点切换到新文件,
//! 历史文件按配置压缩为 `.gz` 并在保留期满后删除.
//!
//! 各库 crate 通过 `log` 门面输出, 初始化时桥接到 tracing.

use std::fs::{File, OpenOptions};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod task;

pub use task::{CleanupReport, cleanup_logs};

/// 文件日志过滤规则的环境变量
pub const LOG_ENV: &str = "TCODE_LOG";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 文件日志级别 (EnvFilter 语法)
    pub level: String,
    /// 控制台日志级别, 为空时不输出到控制台
    pub console_level: Option<String>,
    /// 日志目录
    pub directory: PathBuf,
    /// 日志文件前缀
    pub file_prefix: String,
    /// 历史日志保留天数
    pub retention_days: i64,
    /// 是否压缩历史日志
    pub compress_history: bool,
    /// 清理间隔 (秒)
    pub cleanup_interval_seconds: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_level: Some("warn".to_string()),
            directory: PathBuf::from("logs"),
            file_prefix: "tcode".to_string(),
            retention_days: 30,
            compress_history: true,
            cleanup_interval_seconds: 3600,
        }
    }
}

impl LoggingConfig {
    /// 按 -v 次数调整级别: 0=默认, 1=info/debug, 2+=debug/trace
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        let (console, file) = match verbosity {
            0 => return self,
            1 => ("info", "debug"),
            _ => ("debug", "trace"),
        };
        if self.console_level.is_some() {
            self.console_level = Some(console.to_string());
        }
        self.level = file.to_string();
        self
    }

    /// 文件日志的过滤规则, `TCODE_LOG` 优先
    fn file_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 初始化全局日志
///
/// 进程内只能成功调用一次. 在 tokio 运行时中调用时会启动日志维护任务.
pub fn init(config: LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败: {}", config.directory.display()))?;

    let day_changed = Arc::new(AtomicBool::new(false));
    let writer = DailyFileWriter::open(
        &config.directory,
        &config.file_prefix,
        Arc::clone(&day_changed),
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(LineFormatter {
            ansi: false,
            location: false,
        })
        .with_filter(config.file_filter());

    let console_layer = config.console_level.as_deref().map(|level| {
        let ansi = std::io::stderr().is_terminal();
        fmt::Layer::default()
            .with_writer(std::io::stderr)
            .with_ansi(ansi)
            .event_format(LineFormatter {
                ansi,
                location: true,
            })
            .with_filter(EnvFilter::new(level))
    });

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("全局日志已初始化")?;
    LOG_GUARD.set(guard).ok();

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => task::spawn_maintenance(&handle, config, day_changed),
        Err(_) => tracing::debug!("不在 tokio 运行时中, 跳过日志维护任务"),
    }
    Ok(())
}

/// 日志文件路径
pub fn log_file_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

/// 按日期切换文件的写入器
///
/// 维护任务在零点置位 `day_changed`, 下一次写入时重新打开当日文件.
struct DailyFileWriter {
    directory: PathBuf,
    prefix: String,
    day_changed: Arc<AtomicBool>,
    file: File,
}

impl DailyFileWriter {
    fn open(directory: &Path, prefix: &str, day_changed: Arc<AtomicBool>) -> Result<Self> {
        let path = log_file_path(directory, prefix, Local::now().date_naive());
        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            day_changed,
            file: open_append(&path)?,
        })
    }

    fn reopen(&mut self) -> std::io::Result<()> {
        let path = log_file_path(&self.directory, &self.prefix, Local::now().date_naive());
        self.file = open_append(&path).map_err(std::io::Error::other)?;
        Ok(())
    }
}

impl Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.day_changed.swap(false, Ordering::AcqRel) {
            self.reopen()?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("打开日志文件失败: {}", path.display()))
}

/// 单行日志格式: `[MM-DD HH:MM:SS.mmm] LEVEL [file:line] > message`
struct LineFormatter {
    ansi: bool,
    location: bool,
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write!(writer, "[{}] ", Local::now().format("%m-%d %H:%M:%S%.3f"))?;

        let level = meta.level().as_str();
        if self.ansi {
            let color = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                _ => "\x1b[34m",
            };
            write!(writer, "{color}{level:5}\x1b[0m ")?;
        } else {
            write!(writer, "{level:5} ")?;
        }

        if self.location {
            write!(
                writer,
                "{}:{} ",
                meta.file().unwrap_or("unknown"),
                meta.line().unwrap_or(0)
            )?;
        }
        write!(writer, "> ")?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
