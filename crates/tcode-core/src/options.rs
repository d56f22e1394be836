//! 任务选项.
//!
//! 选项由命令行 `--option k=v` 或任务配置文件提供, 以名称排序保存.
//! 只写名称不写值 (如 `raw`) 等价于 `raw=true`.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{TcError, TcResult};

/// 输出格式覆盖
pub const OPT_FORMAT: &str = "format";
/// 原始输入的分帧大小 (字节)
pub const OPT_FRAME_SIZE: &str = "frame_size";
/// 封装容器
pub const OPT_CONTAINER: &str = "container";
/// 输出裸码流
pub const OPT_RAW: &str = "raw";
/// 失败时保留部分输出
pub const OPT_KEEP_PARTIAL: &str = "keep_partial";
/// 外部工具空闲超时 (毫秒)
pub const OPT_TOOL_TIMEOUT_MS: &str = "tool_timeout_ms";
/// 流中携带音频
pub const OPT_AUDIO: &str = "audio";

/// 所有插件都接受的通用选项
pub const GENERIC_OPTIONS: &[&str] = &[
    OPT_FORMAT,
    OPT_FRAME_SIZE,
    OPT_CONTAINER,
    OPT_RAW,
    OPT_KEEP_PARTIAL,
    OPT_TOOL_TIMEOUT_MS,
    OPT_AUDIO,
];

/// 任务选项表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    values: BTreeMap<String, String>,
}

impl JobOptions {
    /// 创建空选项表
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析单个 `k=v` 选项
    pub fn parse_pair(pair: &str) -> TcResult<(String, String)> {
        let pair = pair.trim();
        let (name, value) = match pair.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (pair, "true"),
        };
        if name.is_empty() {
            return Err(TcError::Configuration(format!("选项缺少名称: '{pair}'")));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TcError::Configuration(format!("无效的选项名称: '{name}'")));
        }
        Ok((name.to_ascii_lowercase(), value.to_string()))
    }

    /// 从多个 `k=v` 字符串构造
    pub fn from_pairs<I, S>(pairs: I) -> TcResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for pair in pairs {
            let (name, value) = Self::parse_pair(pair.as_ref())?;
            options.values.insert(name, value);
        }
        Ok(options)
    }

    /// 设置选项 (覆盖已有值)
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// 合并另一份选项, 同名时以 `other` 为准
    pub fn merge(&mut self, other: &JobOptions) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// 获取原始字符串值
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// 是否设置了该选项
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// 按布尔值解析
    pub fn get_bool(&self, name: &str) -> TcResult<Option<bool>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(TcError::Configuration(format!(
                "选项 {name} 需要布尔值, 实际为 '{value}'"
            ))),
        }
    }

    /// 布尔开关, 未设置视为关闭
    pub fn flag(&self, name: &str) -> TcResult<bool> {
        Ok(self.get_bool(name)?.unwrap_or(false))
    }

    /// 按 u32 解析
    pub fn get_u32(&self, name: &str) -> TcResult<Option<u32>> {
        self.get(name)
            .map(|v| {
                v.parse::<u32>().map_err(|_| {
                    TcError::Configuration(format!("选项 {name} 需要整数, 实际为 '{v}'"))
                })
            })
            .transpose()
    }

    /// 按 u64 解析
    pub fn get_u64(&self, name: &str) -> TcResult<Option<u64>> {
        self.get(name)
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    TcError::Configuration(format!("选项 {name} 需要整数, 实际为 '{v}'"))
                })
            })
            .transpose()
    }

    /// 按毫秒数解析为时长
    pub fn get_duration_ms(&self, name: &str) -> TcResult<Option<Duration>> {
        Ok(self.get_u64(name)?.map(Duration::from_millis))
    }

    /// 所有选项名称
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// 所有选项
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 选项数量
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_解析键值对() {
        assert_eq!(
            JobOptions::parse_pair("rate=44100").ok(),
            Some(("rate".to_string(), "44100".to_string()))
        );
        assert_eq!(
            JobOptions::parse_pair(" Raw ").ok(),
            Some(("raw".to_string(), "true".to_string()))
        );
        assert!(JobOptions::parse_pair("=5").is_err());
        assert!(JobOptions::parse_pair("a b=1").is_err());
    }

    #[test]
    fn test_值中允许等号() {
        let (name, value) = JobOptions::parse_pair("comment=a=b").unwrap();
        assert_eq!(name, "comment");
        assert_eq!(value, "a=b");
    }

    #[test]
    fn test_类型化读取() {
        let opts = JobOptions::from_pairs(["raw", "frame_size=1024", "keep_partial=no"]).unwrap();
        assert!(opts.flag(OPT_RAW).unwrap());
        assert!(!opts.flag(OPT_KEEP_PARTIAL).unwrap());
        assert!(!opts.flag(OPT_AUDIO).unwrap());
        assert_eq!(opts.get_u32(OPT_FRAME_SIZE).unwrap(), Some(1024));
        assert_eq!(opts.get_u32("missing").unwrap(), None);
    }

    #[test]
    fn test_类型错误返回配置错误() {
        let opts = JobOptions::from_pairs(["frame_size=big", "raw=maybe"]).unwrap();
        assert!(matches!(
            opts.get_u32(OPT_FRAME_SIZE),
            Err(TcError::Configuration(_))
        ));
        assert!(matches!(opts.flag(OPT_RAW), Err(TcError::Configuration(_))));
    }

    #[test]
    fn test_合并以后者为准() {
        let mut base = JobOptions::from_pairs(["rate=22050", "channels=1"]).unwrap();
        let over = JobOptions::from_pairs(["rate=48000"]).unwrap();
        base.merge(&over);
        assert_eq!(base.get("rate"), Some("48000"));
        assert_eq!(base.get("channels"), Some("1"));
        assert_eq!(base.len(), 2);
    }
}
