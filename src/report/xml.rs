//! JUnit 风格的 XML 报告
//!
//! 根元素为 `testsuite`，属性 `errors`、`failures`、`name`、`tests`
//! 的名称与常见报告工具一致。整篇文档先在内存中生成，
//! 只有完整的文档才会写入目标。

use crate::context::Charset;
use crate::error::{Result, ScriptestError};
use crate::runner::types::{RunCounts, TestCaseResult, TestOutcome};
use chrono::NaiveDateTime;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use std::borrow::Cow;
use std::time::Duration;

/// 报告文档的数据
pub struct ReportDocument<'a> {
    pub name: &'a str,
    pub counts: RunCounts,
    pub duration: Duration,
    pub timestamp: NaiveDateTime,
    pub cases: &'a [TestCaseResult],
    pub output: &'a [String],
}

/// XML 1.0 不允许出现的字符
fn is_forbidden(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}')
}

/// 把不允许的字符改写成可见的 `\uXXXX`
fn xml_safe(text: &str) -> Cow<'_, str> {
    if !text.contains(is_forbidden) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if is_forbidden(c) {
            out.push_str(&format!("\\u{:04X}", u32::from(c)));
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

fn seconds(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

impl ReportDocument<'_> {
    /// 以指定字符集序列化整篇文档
    pub fn render(&self, charset: Charset) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new(
            "1.0",
            Some(charset.label()),
            None,
        )))?;

        let mut root = BytesStart::new("testsuite");
        root.push_attribute(("errors", self.counts.errors.to_string().as_str()));
        root.push_attribute(("failures", self.counts.failures.to_string().as_str()));
        root.push_attribute(("name", &*xml_safe(self.name)));
        root.push_attribute(("tests", self.counts.tests.to_string().as_str()));
        root.push_attribute(("time", seconds(self.duration).as_str()));
        root.push_attribute((
            "timestamp",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string().as_str(),
        ));

        if self.cases.is_empty() && self.output.is_empty() {
            writer.write_event(Event::Empty(root))?;
        } else {
            writer.write_event(Event::Start(root))?;
            for case in self.cases {
                write_case(&mut writer, case)?;
            }
            if !self.output.is_empty() {
                let mut text = self.output.join("\n");
                text.push('\n');
                writer.write_event(Event::Start(BytesStart::new("system-out")))?;
                writer.write_event(Event::Text(BytesText::new(&xml_safe(&text))))?;
                writer.write_event(Event::End(BytesEnd::new("system-out")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        }

        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        match charset {
            Charset::Utf8 => Ok(bytes),
            other => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| ScriptestError::Other(e.to_string()))?;
                Ok(other.encode(&text))
            }
        }
    }
}

fn write_case(writer: &mut Writer<Vec<u8>>, case: &TestCaseResult) -> Result<()> {
    let mut element = BytesStart::new("testcase");
    element.push_attribute(("classname", &*xml_safe(&case.classname)));
    element.push_attribute(("name", &*xml_safe(&case.name)));
    element.push_attribute(("time", seconds(case.duration).as_str()));

    let tag = match case.outcome {
        TestOutcome::Passed => {
            writer.write_event(Event::Empty(element))?;
            return Ok(());
        }
        TestOutcome::Failure => "failure",
        TestOutcome::Error => "error",
    };

    writer.write_event(Event::Start(element))?;
    let mut fault = BytesStart::new(tag);
    fault.push_attribute(("message", &*xml_safe(case.message.as_deref().unwrap_or_default())));
    fault.push_attribute(("type", &*xml_safe(case.kind.as_deref().unwrap_or_default())));
    match case.trace.as_deref() {
        Some(trace) if !trace.is_empty() => {
            writer.write_event(Event::Start(fault))?;
            writer.write_event(Event::Text(BytesText::new(&xml_safe(trace))))?;
            writer.write_event(Event::End(BytesEnd::new(tag)))?;
        }
        _ => writer.write_event(Event::Empty(fault))?,
    }
    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// 从报告根元素读取的摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub name: String,
    pub tests: u64,
    pub errors: u64,
    pub failures: u64,
}

/// 解析报告根元素的计数属性
pub fn parse_summary(bytes: &[u8], charset: Charset, suite: &str) -> Result<ReportSummary> {
    let text = charset
        .decode(bytes)
        .map_err(|message| ScriptestError::ReportParse {
            suite: suite.to_string(),
            message,
        })?;
    read_root(&text).map_err(|err| match err {
        ScriptestError::ReportParse { .. } => err,
        other => ScriptestError::ReportParse {
            suite: suite.to_string(),
            message: other.to_string(),
        },
    })
}

fn read_root(text: &str) -> Result<ReportSummary> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element) => {
                if element.name().as_ref() != b"testsuite" {
                    return Err(ScriptestError::Other(format!(
                        "根元素应为 testsuite, 实际为 {}",
                        String::from_utf8_lossy(element.name().as_ref())
                    )));
                }
                let attribute = |key: &str| -> Result<String> {
                    match element.try_get_attribute(key)? {
                        Some(attr) => Ok(attr.unescape_value()?.into_owned()),
                        None => Err(ScriptestError::Other(format!("缺少属性 {}", key))),
                    }
                };
                let count = |key: &str| -> Result<u64> {
                    let value = attribute(key)?;
                    value
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| ScriptestError::Other(format!("属性 {} 不是计数: {}", key, value)))
                };
                return Ok(ReportSummary {
                    name: attribute("name")?,
                    tests: count("tests")?,
                    errors: count("errors")?,
                    failures: count("failures")?,
                });
            }
            Event::Eof => return Err(ScriptestError::Other("文档中没有 testsuite 元素".to_string())),
            _ => continue,
        }
    }
}
