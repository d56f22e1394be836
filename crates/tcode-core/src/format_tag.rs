//! 格式标识 (FormatTag).
//!
//! 标识一种容器或编码格式, 如 `AVI`, `DIVX`, `OGG`. 类似 FourCC,
//! 但长度不受限制. 标识在构造时统一转换为大写, 因此 `divx` 与 `DIVX` 相等.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::TcError;

/// 容器/编码格式标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatTag(String);

impl FormatTag {
    /// 创建格式标识 (去除首尾空白并转为大写)
    pub fn new(tag: &str) -> Self {
        Self(tag.trim().to_ascii_uppercase())
    }

    /// 标识字符串
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 根据文件扩展名推断格式
    ///
    /// 无扩展名或扩展名未知时返回 `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let tag = match ext.as_str() {
            "avi" => "AVI",
            "ogg" | "oga" => "OGG",
            "divx" | "m4v" | "cmp" => "DIVX",
            "wav" => "WAV",
            "pcm" | "raw" | "yuv" => "RAW",
            _ => return None,
        };
        Some(Self::new(tag))
    }
}

impl FromStr for FormatTag {
    type Err = TcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = Self::new(s);
        if tag.0.is_empty() {
            return Err(TcError::Configuration("格式标识不能为空".into()));
        }
        if !tag.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TcError::Configuration(format!("无效的格式标识: '{s}'")));
        }
        Ok(tag)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
