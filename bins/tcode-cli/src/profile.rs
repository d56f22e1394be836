//! 导出配置文件.
//!
//! JSON 格式, 例如:
//!
//! ```json
//! {
//!     "import": "raw",
//!     "export": "divx4raw",
//!     "raw_audio": "audio.wav",
//!     "options": { "max_frame_size": 65536, "keep_partial": true }
//! }
//! ```
//!
//! 命令行参数优先于配置文件中的同名项.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tcode_core::JobOptions;

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    /// 导入解码器
    pub import: Option<String>,
    /// 导出编码器
    pub export: Option<String>,
    /// 音频单独导出的路径
    pub raw_audio: Option<PathBuf>,
    /// 插件选项 (字符串、数字或布尔值)
    pub options: BTreeMap<String, Value>,
}

impl Profile {
    /// 读取配置文件
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let profile: Profile = serde_json::from_str(&text)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        log::debug!("载入配置文件: {}", path.display());
        Ok(profile)
    }

    /// 转换为任务选项
    pub fn job_options(&self) -> Result<JobOptions> {
        let mut options = JobOptions::new();
        for (name, value) in &self.options {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => bail!("选项 '{name}' 的值必须是字符串、数字或布尔值, 实际为 {other}"),
            };
            let (name, value) = JobOptions::parse_pair(&format!("{name}={value}"))?;
            options.set(name, value);
        }
        Ok(options)
    }
}
