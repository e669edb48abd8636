use chrono::NaiveDateTime;
use serde::Serialize;
use std::time::Duration;

/// 单个测试的结果类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    /// 测试自身报告的断言不符
    Failure,
    /// 其他未捕获的异常（包括 setUp/tearDown 中的）
    Error,
}

/// 单个测试方法的执行结果
#[derive(Debug, Clone, Serialize)]
pub struct TestCaseResult {
    /// 测试方法名
    pub name: String,

    /// 所属用例（构造函数名）
    pub classname: String,

    /// 执行耗时
    pub duration: Duration,

    pub outcome: TestOutcome,

    /// 失败或错误消息
    pub message: Option<String>,

    /// 异常类型名（如 AssertionFailedError、TypeError）
    pub kind: Option<String>,

    /// 调用栈文本
    pub trace: Option<String>,
}

impl TestCaseResult {
    pub fn passed(classname: &str, name: &str, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            classname: classname.to_string(),
            duration,
            outcome: TestOutcome::Passed,
            message: None,
            kind: None,
            trace: None,
        }
    }

    pub fn faulted(
        outcome: TestOutcome,
        classname: &str,
        name: &str,
        duration: Duration,
        kind: String,
        message: String,
        trace: String,
    ) -> Self {
        Self {
            name: name.to_string(),
            classname: classname.to_string(),
            duration,
            outcome,
            message: Some(message),
            kind: Some(kind),
            trace: Some(trace),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.outcome == TestOutcome::Passed
    }
}

/// 测试计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub tests: u64,
    pub failures: u64,
    pub errors: u64,
}

impl RunCounts {
    pub fn from_results(results: &[TestCaseResult]) -> Self {
        let count = |outcome: TestOutcome| results.iter().filter(|r| r.outcome == outcome).count() as u64;
        Self {
            tests: results.len() as u64,
            failures: count(TestOutcome::Failure),
            errors: count(TestOutcome::Error),
        }
    }

    pub fn passed(&self) -> u64 {
        self.tests - self.failures - self.errors
    }
}

/// 一次套件运行的结果，附带已序列化的报告正文
#[derive(Debug, Clone)]
pub struct RunResult {
    /// 报告标题（testsuite 的 name 属性）
    pub name: String,
    pub counts: RunCounts,
    pub duration: Duration,
    pub timestamp: NaiveDateTime,
    pub cases: Vec<TestCaseResult>,
    /// 脚本 `print` 输出
    pub output: Vec<String>,
    pub report: Vec<u8>,
}
