use crate::context::{Charset, SourceSelector};
use crate::discovery::DiscoveryMode;
use crate::error::{Result, ScriptestError};
use crate::orchestrator::{SuiteOrchestrator, SuiteSpec, validate_suite_name};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// 默认报告目录（相对基础目录）
pub const DEFAULT_REPORTS_DIR: &str = "target/scriptest-reports";

fn default_reports_dir() -> PathBuf {
    PathBuf::from(DEFAULT_REPORTS_DIR)
}

fn default_true() -> bool {
    true
}

/// `[[suites]]` 表
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SuiteConfig {
    pub name: String,

    /// 发现模式，不区分大小写，默认 TestCases
    #[serde(default)]
    pub mode: Option<String>,

    /// 报告目录，默认使用全局 `reports_dir`
    #[serde(default)]
    pub to_dir: Option<PathBuf>,

    #[serde(default)]
    pub charset: Option<String>,

    /// 按顺序加载的源文件
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// 完整的配置文件
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ScriptestConfig {
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    #[serde(default)]
    pub charset: Option<String>,

    #[serde(default = "default_true")]
    pub halt_on_error: bool,

    #[serde(default = "default_true")]
    pub halt_on_failure: bool,

    #[serde(default)]
    pub print_summary: bool,

    /// 跳过整个运行
    #[serde(default)]
    pub skip: bool,

    /// 只加载源码做语法检查
    #[serde(default)]
    pub skip_exec: bool,

    /// 每个套件都先加载的源文件
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    #[serde(default)]
    pub suites: Vec<SuiteConfig>,

    /// 配置文件所在目录，相对路径以此为起点
    #[serde(skip)]
    pub root: PathBuf,
}

impl Default for ScriptestConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            reports_dir: default_reports_dir(),
            charset: None,
            halt_on_error: true,
            halt_on_failure: true,
            print_summary: false,
            skip: false,
            skip_exec: false,
            sources: Vec::new(),
            suites: Vec::new(),
            root: PathBuf::new(),
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parse_charset(value: Option<&str>) -> Result<Option<Charset>> {
    value.map(str::parse).transpose()
}

impl ScriptestConfig {
    /// 基础目录：配置文件目录 + `base_dir`
    pub fn base_dir(&self) -> PathBuf {
        match &self.base_dir {
            Some(dir) => resolve(&self.root, dir),
            None => self.root.clone(),
        }
    }

    pub fn reports_dir(&self) -> PathBuf {
        resolve(&self.base_dir(), &self.reports_dir)
    }

    /// 运行任何套件之前检查配置
    pub fn validate(&self) -> Result<()> {
        let base_dir = self.base_dir();
        if !base_dir.is_dir() {
            return Err(ScriptestError::Config(format!(
                "基础目录不存在: {}",
                base_dir.display()
            )));
        }
        if self.suites.is_empty() && !self.skip_exec {
            return Err(ScriptestError::Config("没有声明任何测试套件".to_string()));
        }
        parse_charset(self.charset.as_deref())?;

        let mut names = HashSet::new();
        for suite in &self.suites {
            validate_suite_name(&suite.name)?;
            if !names.insert(suite.name.as_str()) {
                return Err(ScriptestError::Config(format!("测试套件名称重复: {}", suite.name)));
            }
            suite.discovery_mode()?;
            parse_charset(suite.charset.as_deref())?;
        }
        Ok(())
    }

    /// 按声明顺序生成套件
    pub fn suite_specs(&self) -> Result<Vec<SuiteSpec>> {
        let base_dir = self.base_dir();
        let reports_dir = self.reports_dir();
        self.suites
            .iter()
            .map(|suite| -> Result<SuiteSpec> {
                let to_dir = suite
                    .to_dir
                    .as_ref()
                    .map(|dir| resolve(&base_dir, dir))
                    .unwrap_or_else(|| reports_dir.clone());
                let mut spec = SuiteSpec::new(&suite.name, suite.discovery_mode()?, to_dir);
                if let Some(charset) = parse_charset(suite.charset.as_deref())? {
                    spec = spec.with_charset(charset);
                }
                for file in &suite.files {
                    spec = spec.with_file(file);
                }
                Ok(spec)
            })
            .collect()
    }

    pub fn orchestrator(&self) -> Result<SuiteOrchestrator> {
        let sources = self
            .sources
            .iter()
            .map(|path| SourceSelector::File(path.clone()))
            .collect();
        Ok(SuiteOrchestrator::new(self.base_dir())
            .with_global_sources(sources)
            .with_charset(parse_charset(self.charset.as_deref())?)
            .halt_on_error(self.halt_on_error)
            .halt_on_failure(self.halt_on_failure)
            .skip_exec(self.skip_exec)
            .print_summary(self.print_summary))
    }
}

impl SuiteConfig {
    pub fn discovery_mode(&self) -> Result<DiscoveryMode> {
        match &self.mode {
            Some(mode) => mode.parse(),
            None => Ok(DiscoveryMode::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
base_dir = "js"
charset = "utf-8"
halt_on_failure = false
sources = ["lib/shared.js"]

[[suites]]
name = "First"
files = ["FirstTest.js"]

[[suites]]
name = "Everything"
mode = "alltests"
to_dir = "out"
charset = "ISO-8859-1"
files = ["AllTests.js", "MoreTests.js"]
"#;

    fn config(root: &Path) -> ScriptestConfig {
        let mut config: ScriptestConfig = toml::from_str(CONFIG).unwrap();
        config.root = root.to_path_buf();
        config
    }

    #[test]
    fn test_defaults() {
        let config: ScriptestConfig = toml::from_str("").unwrap();
        assert_eq!(config, ScriptestConfig::default());
        assert!(config.halt_on_error);
        assert!(config.halt_on_failure);
        assert_eq!(config.reports_dir, PathBuf::from("target/scriptest-reports"));
    }

    #[test]
    fn test_suite_specs_resolve_paths() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let base = dir.path().join("js");
        assert_eq!(config.base_dir(), base);

        let specs = config.suite_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].mode, DiscoveryMode::TestCases);
        assert_eq!(specs[0].reports_dir, base.join("target/scriptest-reports"));
        assert_eq!(specs[0].charset, None);
        assert_eq!(specs[1].mode, DiscoveryMode::AllTests);
        assert_eq!(specs[1].reports_dir, base.join("out"));
        assert_eq!(specs[1].charset, Some(Charset::Latin1));
        assert_eq!(
            specs[1].sources,
            vec![
                SourceSelector::File(PathBuf::from("AllTests.js")),
                SourceSelector::File(PathBuf::from("MoreTests.js")),
            ]
        );

        let orchestrator = config.orchestrator().unwrap();
        assert!(orchestrator.policy().halt_on_error);
        assert!(!orchestrator.policy().halt_on_failure);
    }

    #[test]
    fn test_validation() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("基础目录不存在"));

        std::fs::create_dir(dir.path().join("js")).unwrap();
        config.validate().unwrap();

        config.suites[1].mode = Some("everything".to_string());
        assert!(matches!(config.validate(), Err(ScriptestError::Config(_))));

        config.suites[1].mode = None;
        config.suites[1].charset = Some("EBCDIC".to_string());
        assert!(matches!(config.validate(), Err(ScriptestError::Config(_))));

        config.suites[1].charset = None;
        for name in ["nested/Second", "..", "up\\Second"] {
            config.suites[1].name = name.to_string();
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("路径分隔符"), "{} accepted", name);
        }

        config.suites[1].name = "First".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("重复"));

        config.suites.clear();
        assert!(config.validate().is_err());
        config.skip_exec = true;
        config.validate().unwrap();
    }
}
