//! 外部工具定位.
//!
//! 工具路径按以下顺序解析:
//! 1. 显式覆盖 (环境变量 `TCODE_TOOL_<NAME>`, 如 `TCODE_TOOL_OGGENC`)
//! 2. 工具名本身是路径时直接检查该文件
//! 3. 依次搜索 PATH 中的目录

use std::collections::HashMap;
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// 工具覆盖变量前缀
pub const TOOL_ENV_PREFIX: &str = "TCODE_TOOL_";

/// 外部工具定位器
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
    search_paths: Vec<PathBuf>,
    overrides: HashMap<String, PathBuf>,
}

impl ToolLocator {
    /// 使用给定的搜索目录创建 (不读取环境变量)
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            overrides: HashMap::new(),
        }
    }

    /// 从进程环境 (PATH 与 TCODE_TOOL_*) 创建
    pub fn from_env() -> Self {
        let search_paths = env::var_os("PATH")
            .map(|p| env::split_paths(&p).collect())
            .unwrap_or_default();
        let mut locator = Self::new(search_paths);
        for (key, value) in env::vars_os() {
            let Some(key) = key.to_str() else {
                continue;
            };
            if let Some(tool) = key.strip_prefix(TOOL_ENV_PREFIX) {
                if !tool.is_empty() && !value.is_empty() {
                    locator = locator.with_override(tool, PathBuf::from(value));
                }
            }
        }
        locator
    }

    /// 为指定工具设置显式路径
    pub fn with_override(mut self, tool: &str, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(tool.to_ascii_lowercase(), path.into());
        self
    }

    /// 解析工具的可执行文件路径
    pub fn locate(&self, tool: &str) -> Option<PathBuf> {
        if let Some(path) = self.overrides.get(&tool.to_ascii_lowercase()) {
            return is_executable(path).then(|| path.clone());
        }

        let direct = Path::new(tool);
        if direct.components().count() > 1 || direct.is_absolute() {
            return is_executable(direct).then(|| direct.to_path_buf());
        }

        for dir in &self.search_paths {
            let full = dir.join(tool);
            if is_executable(&full) {
                return Some(full);
            }
            #[cfg(windows)]
            {
                let exe = dir.join(format!("{tool}.exe"));
                if is_executable(&exe) {
                    return Some(exe);
                }
            }
        }
        None
    }

    /// 工具是否可用
    pub fn is_available(&self, tool: &str) -> bool {
        self.locate(tool).is_some()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// 工具名对应的覆盖变量名
pub fn override_var_name(tool: impl AsRef<OsStr>) -> String {
    format!(
        "{TOOL_ENV_PREFIX}{}",
        tool.as_ref().to_string_lossy().to_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn make_tool(dir: &Path, name: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, b"#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_在搜索目录中找到可执行文件() {
        let dir = tempfile::tempdir().unwrap();
        let expected = make_tool(dir.path(), "oggenc", 0o755);
        let locator = ToolLocator::new(vec![PathBuf::from("/nonexistent"), dir.path().into()]);
        assert_eq!(locator.locate("oggenc"), Some(expected));
        assert!(!locator.is_available("oggdec"));
    }

    #[cfg(unix)]
    #[test]
    fn test_忽略不可执行文件() {
        let dir = tempfile::tempdir().unwrap();
        make_tool(dir.path(), "oggdec", 0o644);
        let locator = ToolLocator::new(vec![dir.path().into()]);
        assert!(!locator.is_available("oggdec"));
    }

    #[cfg(unix)]
    #[test]
    fn test_显式覆盖优先于搜索目录() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        make_tool(dir.path(), "oggenc", 0o755);
        let custom = make_tool(other.path(), "my-oggenc", 0o755);
        let locator =
            ToolLocator::new(vec![dir.path().into()]).with_override("OGGENC", custom.clone());
        assert_eq!(locator.locate("oggenc"), Some(custom));
    }

    #[test]
    fn test_覆盖指向不存在的文件时不可用() {
        let locator = ToolLocator::new(Vec::new()).with_override("oggenc", "/no/such/oggenc");
        assert!(!locator.is_available("oggenc"));
    }

    #[test]
    fn test_覆盖变量名() {
        assert_eq!(override_var_name("oggenc"), "TCODE_TOOL_OGGENC");
    }
}
