use super::types::ScriptestConfig;
use crate::error::{Result, ScriptestError};
use std::fs;
use std::path::{Path, PathBuf};

/// 配置文件加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件名
    pub const CONFIG_FILE: &'static str = "scriptest.toml";

    /// 从指定路径加载配置文件
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<ScriptestConfig> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ScriptestError::Config(format!("无法读取配置文件 {}: {}", path.display(), e)))?;

        let mut config: ScriptestConfig = toml::from_str(&content)?;
        config.root = path
            .parent()
            .map(Path::to_path_buf)
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        tracing::debug!(path = %path.display(), suites = config.suites.len(), "Config loaded");
        Ok(config)
    }

    /// 加载配置
    /// 查找顺序：
    /// 1. 命令行指定的路径
    /// 2. 当前目录及其父目录
    /// 3. 用户配置目录 ~/.config/scriptest/
    pub fn load(explicit: Option<&Path>) -> Result<ScriptestConfig> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        match Self::find() {
            Some(path) => Self::load_from_path(path),
            None => Err(ScriptestError::Config(format!(
                "未找到配置文件 {}",
                Self::CONFIG_FILE
            ))),
        }
    }

    /// 查找配置文件路径
    pub fn find() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        Self::find_upwards(&current).or_else(Self::find_in_user_dir)
    }

    /// 从指定目录向上查找
    pub fn find_upwards(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            let config_path = current.join(Self::CONFIG_FILE);
            if config_path.is_file() {
                return Some(config_path);
            }

            // 尝试父目录
            if !current.pop() {
                return None;
            }
        }
    }

    fn find_in_user_dir() -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let config_path = home.join(".config").join("scriptest").join(Self::CONFIG_FILE);
        config_path.is_file().then_some(config_path)
    }
}
