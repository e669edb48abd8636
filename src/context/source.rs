use crate::error::{Result, ScriptestError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 源文件与报告使用的字符集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
}

impl Charset {
    /// XML 声明中使用的名称
    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> std::result::Result<String, String> {
        match self {
            Charset::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
            }
            Charset::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }

    /// 编码文本；Latin-1 无法表示的字符写成数字字符引用
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Latin1 => {
                let mut out = Vec::with_capacity(text.len());
                for c in text.chars() {
                    match u8::try_from(u32::from(c)) {
                        Ok(byte) => out.push(byte),
                        Err(_) => out.extend_from_slice(format!("&#x{:X};", u32::from(c)).as_bytes()),
                    }
                }
                out
            }
        }
    }
}

impl FromStr for Charset {
    type Err = ScriptestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => Ok(Charset::Latin1),
            other => Err(ScriptestError::Config(format!("不支持的字符集: {}", other))),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// 一个待加载的源码单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    name: String,
    content: String,
    charset: Option<Charset>,
}

impl SourceUnit {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            charset: None,
        }
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = Some(charset);
        self
    }

    /// 读取文件，单元名为文件名
    pub fn from_file(path: &Path, charset: Option<Charset>) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| ScriptestError::SourceRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let content = charset
            .unwrap_or_default()
            .decode(&bytes)
            .map_err(|message| ScriptestError::SourceRead {
                path: path.to_path_buf(),
                message,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            content,
            charset,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn charset(&self) -> Option<Charset> {
        self.charset
    }
}

/// 源码选择器，由调用方解析成具体的源码单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelector {
    File(PathBuf),
    Inline(SourceUnit),
}

impl SourceSelector {
    pub fn resolve(&self, base_dir: &Path, charset: Option<Charset>) -> Result<SourceUnit> {
        match self {
            SourceSelector::File(path) => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                SourceUnit::from_file(&path, charset)
            }
            SourceSelector::Inline(unit) => Ok(unit.clone()),
        }
    }
}
