use crate::discovery::DiscoveryMode;
use crate::error::{Result, ScriptestError};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// 错误/失败时是否中止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaltPolicy {
    pub halt_on_error: bool,
    pub halt_on_failure: bool,
}

impl Default for HaltPolicy {
    fn default() -> Self {
        Self {
            halt_on_error: true,
            halt_on_failure: true,
        }
    }
}

impl HaltPolicy {
    pub fn verdict(&self, errors: u64, failures: u64) -> Verdict {
        if errors + failures == 0 {
            Verdict::Passed
        } else if (errors > 0 && self.halt_on_error) || (failures > 0 && self.halt_on_failure) {
            Verdict::Failed
        } else {
            Verdict::Warned
        }
    }
}

/// 整次运行的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Passed,
    /// 有错误或失败，但策略允许继续
    Warned,
    Failed,
}

/// 单个套件的结果，计数取自已写入的报告
#[derive(Debug, Clone, Serialize)]
pub struct SuiteOutcome {
    pub name: String,
    pub mode: DiscoveryMode,
    /// 报告文件；只做语法检查时为空
    pub report: Option<PathBuf>,
    pub units: usize,
    pub tests: u64,
    pub errors: u64,
    pub failures: u64,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// 跨套件累计的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateResult {
    pub tests: u64,
    pub errors: u64,
    pub failures: u64,
    pub suites: Vec<SuiteOutcome>,
    pub verdict: Verdict,
}

impl AggregateResult {
    pub fn record(&mut self, outcome: SuiteOutcome) {
        self.tests += outcome.tests;
        self.errors += outcome.errors;
        self.failures += outcome.failures;
        self.suites.push(outcome);
    }

    pub fn decide(&mut self, policy: HaltPolicy) -> Verdict {
        self.verdict = policy.verdict(self.errors, self.failures);
        self.verdict
    }

    /// 按结论返回：`Failed` 为错误，`Warned` 记录日志后视为成功
    pub fn into_result(self) -> Result<Self> {
        match self.verdict {
            Verdict::Passed => Ok(self),
            Verdict::Warned => {
                tracing::error!(
                    "There have been {} errors and {} failures testing JavaScript",
                    self.errors,
                    self.failures
                );
                tracing::warn!("Halt policy allows the run to continue");
                Ok(self)
            }
            Verdict::Failed => Err(ScriptestError::TestsFailed {
                errors: self.errors,
                failures: self.failures,
            }),
        }
    }
}
