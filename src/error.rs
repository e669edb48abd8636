use crate::script::ScriptError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptestError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("内置脚本库加载失败: {0}")]
    Bootstrap(#[source] ScriptError),

    #[error("无法读取源文件 {path}: {message}")]
    SourceRead { path: PathBuf, message: String },

    #[error("脚本加载失败 [{unit}]: {source}")]
    ScriptLoad {
        unit: String,
        #[source]
        source: ScriptError,
    },

    #[error("脚本求值失败 [{name}]: {message}")]
    ScriptEvaluation { name: String, message: String },

    #[error("无法写入报告 {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("无法解析测试套件 {suite} 的报告: {message}")]
    ReportParse { suite: String, message: String },

    #[error("测试未通过: {errors} 个错误, {failures} 个失败")]
    TestsFailed { errors: u64, failures: u64 },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML 错误: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("TOML 解析错误: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for ScriptestError {
    fn from(err: anyhow::Error) -> Self {
        ScriptestError::Other(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ScriptestError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        ScriptestError::Xml(quick_xml::Error::from(err))
    }
}

/// Result type for scriptest crate
pub type Result<T> = std::result::Result<T, ScriptestError>;
