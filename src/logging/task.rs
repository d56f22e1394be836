//! 日志维护任务: 零点切换, 历史压缩, 过期删除.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone};
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::runtime::Handle;

use super::LoggingConfig;

/// 一次清理的结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    /// 删除的过期文件数
    pub removed: usize,
    /// 新压缩的历史文件数
    pub compressed: usize,
}

pub(super) fn spawn_maintenance(
    handle: &Handle,
    config: LoggingConfig,
    day_changed: Arc<AtomicBool>,
) {
    handle.spawn(async move {
        let period = Duration::from_secs(config.cleanup_interval_seconds.max(1));
        let mut ticker = tokio::time::interval(period);
        let mut rollover_at = tokio::time::Instant::now() + next_rollover(Local::now());

        loop {
            tokio::select! {
                _ = ticker.tick() => run_cleanup(&config, Local::now().date_naive()),
                _ = tokio::time::sleep_until(rollover_at) => {
                    day_changed.store(true, Ordering::Release);
                    tracing::info!("日志切换到新的一天");
                    run_cleanup(&config, Local::now().date_naive());
                    rollover_at = tokio::time::Instant::now() + next_rollover(Local::now());
                }
            }
        }
    });
}

fn run_cleanup(config: &LoggingConfig, today: NaiveDate) {
    match cleanup_logs(config, today) {
        Ok(report) if report != CleanupReport::default() => {
            tracing::debug!(
                "日志清理: 删除 {} 个, 压缩 {} 个",
                report.removed,
                report.compressed
            );
        }
        Ok(_) => {}
        Err(err) => tracing::error!("日志清理失败: {err:#}"),
    }
}

/// 清理日志目录
///
/// 早于保留期的文件 (含压缩文件) 被删除; 开启压缩时, 今天以前的
/// 未压缩文件被压缩为 `.gz`. 不属于该前缀的文件不受影响.
pub fn cleanup_logs(config: &LoggingConfig, today: NaiveDate) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let directory = config.directory.as_path();
    if !directory.exists() {
        return Ok(report);
    }

    let cutoff = today - ChronoDuration::days(config.retention_days);
    let entries = fs::read_dir(directory)
        .with_context(|| format!("读取日志目录失败: {}", directory.display()))?;
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((date, compressed)) = parse_log_file_name(name, &config.file_prefix) else {
            continue;
        };

        if date < cutoff {
            fs::remove_file(&path)
                .with_context(|| format!("删除过期日志失败: {}", path.display()))?;
            report.removed += 1;
        } else if config.compress_history && !compressed && date < today {
            if gzip_file(&path)? {
                report.compressed += 1;
            }
        }
    }
    Ok(report)
}

/// 压缩为 `<path>.gz` 并删除原文件; 目标已存在时不做任何事
fn gzip_file(path: &Path) -> Result<bool> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);
    if gz_path.exists() {
        return Ok(false);
    }

    let mut input =
        File::open(path).with_context(|| format!("打开日志失败: {}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩文件失败: {}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)?;
    Ok(true)
}

/// 解析 `<prefix>.<YYYY-MM-DD>.log[.gz]`, 返回日期与是否已压缩
fn parse_log_file_name(name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('.')?;
    let (date, compressed) = match rest.strip_suffix(".log.gz") {
        Some(date) => (date, true),
        None => (rest.strip_suffix(".log")?, false),
    };
    if date.len() != 10 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((date, compressed))
}

/// 距离下一个本地零点的时长
fn next_rollover(now: DateTime<Local>) -> Duration {
    let midnight = (now.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .and_then(|t| Local.from_local_datetime(&t).earliest());
    match midnight {
        Some(at) => (at - now).to_std().unwrap_or(Duration::from_secs(1)),
        None => Duration::from_secs(3600),
    }
}
