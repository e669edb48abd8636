//! 多套件编排
//!
//! 每个套件使用独立的执行环境：按顺序加载源码，运行测试并写出
//! `TEST-<name>.xml`，然后从刚写出的报告中读回计数进行累计。

pub mod aggregate;

pub use aggregate::{AggregateResult, HaltPolicy, SuiteOutcome, Verdict};

use crate::context::{Charset, ContextScope, ScriptContext, SourceSelector};
use crate::discovery::DiscoveryMode;
use crate::error::{Result, ScriptestError};
use crate::report::{ReportFile, ReportTee, parse_summary};
use crate::runner::TestReportGenerator;
use crate::script::with_script_stack;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// 一个待运行的套件声明
#[derive(Debug, Clone)]
pub struct SuiteSpec {
    pub name: String,
    pub mode: DiscoveryMode,
    pub reports_dir: PathBuf,
    pub charset: Option<Charset>,
    pub sources: Vec<SourceSelector>,
}

impl SuiteSpec {
    pub fn new(name: impl Into<String>, mode: DiscoveryMode, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mode,
            reports_dir: reports_dir.into(),
            charset: None,
            sources: Vec::new(),
        }
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = Some(charset);
        self
    }

    pub fn with_source(mut self, source: SourceSelector) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        self.with_source(SourceSelector::File(path.into()))
    }
}

pub struct SuiteOrchestrator {
    base_dir: PathBuf,
    /// 每个套件都先加载的公共源码
    global_sources: Vec<SourceSelector>,
    charset: Option<Charset>,
    policy: HaltPolicy,
    skip_exec: bool,
    print_summary: bool,
}

impl SuiteOrchestrator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            global_sources: Vec::new(),
            charset: None,
            policy: HaltPolicy::default(),
            skip_exec: false,
            print_summary: false,
        }
    }

    pub fn with_global_sources(mut self, sources: Vec<SourceSelector>) -> Self {
        self.global_sources = sources;
        self
    }

    pub fn with_charset(mut self, charset: Option<Charset>) -> Self {
        self.charset = charset;
        self
    }

    pub fn halt_on_error(mut self, halt: bool) -> Self {
        self.policy.halt_on_error = halt;
        self
    }

    pub fn halt_on_failure(mut self, halt: bool) -> Self {
        self.policy.halt_on_failure = halt;
        self
    }

    /// 只加载源码，不执行测试
    pub fn skip_exec(mut self, skip: bool) -> Self {
        self.skip_exec = skip;
        self
    }

    pub fn print_summary(mut self, print: bool) -> Self {
        self.print_summary = print;
        self
    }

    pub fn policy(&self) -> HaltPolicy {
        self.policy
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// 运行所有套件并按策略返回
    ///
    /// 有错误或失败且策略要求中止时返回 `TestsFailed`。
    pub fn run_all(&self, suites: Vec<SuiteSpec>) -> Result<AggregateResult> {
        self.execute(suites)?.into_result()
    }

    /// 运行所有套件并给出结论，不对结论做处理
    ///
    /// 配置错误与加载、写入失败立即返回，已写出的报告保留。
    pub fn execute(&self, suites: Vec<SuiteSpec>) -> Result<AggregateResult> {
        self.validate(&suites)?;

        let mut aggregate = AggregateResult::default();
        if suites.is_empty() {
            // 只有语法检查时才允许没有套件：检查公共源码
            let outcome = with_script_stack(|| {
                self.check_sources("<global>", DiscoveryMode::default(), self.charset, &[])
            })??;
            aggregate.record(outcome);
        }
        for suite in suites {
            let outcome = with_script_stack(move || {
                if self.skip_exec {
                    let charset = suite.charset.or(self.charset);
                    self.check_sources(&suite.name, suite.mode, charset, &suite.sources)
                } else {
                    self.run_suite(suite)
                }
            })??;
            aggregate.record(outcome);
        }

        let verdict = aggregate.decide(self.policy);
        tracing::info!(
            suites = aggregate.suites.len(),
            tests = aggregate.tests,
            errors = aggregate.errors,
            failures = aggregate.failures,
            verdict = ?verdict,
            "All suites finished"
        );
        Ok(aggregate)
    }

    fn validate(&self, suites: &[SuiteSpec]) -> Result<()> {
        if !self.base_dir.is_dir() {
            return Err(ScriptestError::Config(format!(
                "基础目录不存在: {}",
                self.base_dir.display()
            )));
        }
        if suites.is_empty() && !self.skip_exec {
            return Err(ScriptestError::Config("没有声明任何测试套件".to_string()));
        }
        let mut names = HashSet::new();
        for suite in suites {
            validate_suite_name(&suite.name)?;
            if !names.insert(suite.name.as_str()) {
                return Err(ScriptestError::Config(format!("测试套件名称重复: {}", suite.name)));
            }
        }
        Ok(())
    }

    /// 按顺序加载公共源码和套件源码，返回加载的单元数
    fn load_sources(&self, scope: &mut ContextScope<'_>, sources: &[SourceSelector], charset: Option<Charset>) -> Result<usize> {
        let mut loaded = 0;
        for selector in self.global_sources.iter().chain(sources) {
            let unit = selector.resolve(&self.base_dir, charset)?;
            scope.load(unit)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    fn check_sources(
        &self,
        name: &str,
        mode: DiscoveryMode,
        charset: Option<Charset>,
        sources: &[SourceSelector],
    ) -> Result<SuiteOutcome> {
        let start = Instant::now();
        let mut context = ScriptContext::new()?;
        let mut scope = context.enter();
        let units = self.load_sources(&mut scope, sources, charset)?;
        tracing::info!(suite = name, units, "Sources loaded, execution skipped");
        Ok(SuiteOutcome {
            name: name.to_string(),
            mode,
            report: None,
            units,
            tests: 0,
            errors: 0,
            failures: 0,
            duration: start.elapsed(),
        })
    }

    fn run_suite(&self, suite: SuiteSpec) -> Result<SuiteOutcome> {
        let start = Instant::now();
        let charset = suite.charset.or(self.charset);
        tracing::info!(suite = %suite.name, mode = %suite.mode, "Starting suite");

        let mut context = ScriptContext::new()?;
        let mut scope = context.enter();
        let units = self.load_sources(&mut scope, &suite.sources, charset)?;

        let generator = TestReportGenerator::new()
            .with_charset(charset.unwrap_or_default())
            .with_summary(self.print_summary);
        let file = ReportFile::create(&suite.reports_dir, &suite.name)?;
        let mut tee = ReportTee::new(file);
        generator.run(&mut scope, suite.mode, Some(&suite.name), &mut tee)?;

        let (file, captured) = tee.into_parts();
        let summary = parse_summary(&captured, charset.unwrap_or_default(), &suite.name)?;
        tracing::info!(
            suite = %suite.name,
            report = %file.path().display(),
            tests = summary.tests,
            errors = summary.errors,
            failures = summary.failures,
            "Report written"
        );

        Ok(SuiteOutcome {
            name: suite.name,
            mode: suite.mode,
            report: Some(file.path().to_path_buf()),
            units,
            tests: summary.tests,
            errors: summary.errors,
            failures: summary.failures,
            duration: start.elapsed(),
        })
    }
}

/// 套件名称会成为报告文件名的一部分
pub fn validate_suite_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ScriptestError::Config("测试套件名称不能为空".to_string()));
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(ScriptestError::Config(format!(
            "测试套件名称不能包含路径分隔符或 '..': {}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SourceUnit;
    use tempfile::TempDir;

    fn passing(name: &str) -> SourceSelector {
        SourceSelector::Inline(SourceUnit::new(
            format!("{}Test.js", name),
            format!(
                "function {0}Test(name) {{ TestCase.call(this, name); }}\n\
                 {0}Test.prototype = new TestCase();\n\
                 {0}Test.prototype.testOne = function() {{ this.assertTrue(true); }};\n",
                name
            ),
        ))
    }

    fn failing() -> SourceSelector {
        SourceSelector::Inline(SourceUnit::new(
            "FailingTest.js",
            "function FailingTest(name) { TestCase.call(this, name); }\n\
             FailingTest.prototype = new TestCase();\n\
             FailingTest.prototype.testFails = function() { this.fail(\"nope\"); };\n",
        ))
    }

    #[test]
    fn test_validation_happens_before_any_suite_runs() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        let suites = vec![
            SuiteSpec::new("Same", DiscoveryMode::TestCases, &reports).with_source(passing("Same")),
            SuiteSpec::new("Same", DiscoveryMode::TestCases, &reports).with_source(passing("Same")),
        ];
        let err = SuiteOrchestrator::new(dir.path()).execute(suites).unwrap_err();
        assert!(matches!(err, ScriptestError::Config(_)));
        assert!(!reports.exists());

        let err = SuiteOrchestrator::new(dir.path()).execute(Vec::new()).unwrap_err();
        assert!(matches!(err, ScriptestError::Config(_)));

        let missing = SuiteOrchestrator::new(dir.path().join("missing")).execute(Vec::new());
        assert!(matches!(missing, Err(ScriptestError::Config(_))));
    }

    #[test]
    fn test_counts_come_from_written_reports() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        let suites = vec![
            SuiteSpec::new("Good", DiscoveryMode::TestCases, &reports).with_source(passing("Good")),
            SuiteSpec::new("Bad", DiscoveryMode::TestCases, &reports).with_source(failing()),
        ];

        let aggregate = SuiteOrchestrator::new(dir.path())
            .halt_on_failure(false)
            .run_all(suites)
            .unwrap();

        assert_eq!(aggregate.verdict, Verdict::Warned);
        assert_eq!((aggregate.tests, aggregate.errors, aggregate.failures), (2, 0, 1));
        assert_eq!(aggregate.suites[1].report, Some(reports.join("TEST-Bad.xml")));
        assert!(reports.join("TEST-Good.xml").exists());
    }

    #[test]
    fn test_load_failure_aborts_remaining_suites() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        let broken = SourceSelector::Inline(SourceUnit::new("Broken.js", "function ( {"));
        let suites = vec![
            SuiteSpec::new("First", DiscoveryMode::TestCases, &reports).with_source(passing("First")),
            SuiteSpec::new("Second", DiscoveryMode::TestCases, &reports).with_source(broken),
            SuiteSpec::new("Third", DiscoveryMode::TestCases, &reports).with_source(passing("Third")),
        ];

        let err = SuiteOrchestrator::new(dir.path()).run_all(suites).unwrap_err();
        assert!(matches!(err, ScriptestError::ScriptLoad { ref unit, .. } if unit == "Broken.js"));
        assert!(reports.join("TEST-First.xml").exists());
        assert!(!reports.join("TEST-Second.xml").exists());
        assert!(!reports.join("TEST-Third.xml").exists());
    }

    #[test]
    fn test_skip_exec_only_loads() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        let suites = vec![SuiteSpec::new("Checked", DiscoveryMode::TestCases, &reports).with_source(failing())];

        let aggregate = SuiteOrchestrator::new(dir.path())
            .with_global_sources(vec![passing("Shared")])
            .skip_exec(true)
            .run_all(suites)
            .unwrap();

        assert_eq!(aggregate.suites[0].units, 2);
        assert_eq!(aggregate.suites[0].report, None);
        assert_eq!(aggregate.verdict, Verdict::Passed);
        assert!(!reports.exists());
    }

    #[test]
    fn test_global_sources_are_loaded_first() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        let shared = SourceSelector::Inline(SourceUnit::new("shared.js", "function double(x) { return x * 2; }"));
        let user = SourceSelector::Inline(SourceUnit::new(
            "DoubleTest.js",
            "function DoubleTest(name) { TestCase.call(this, name); }\n\
             DoubleTest.prototype = new TestCase();\n\
             DoubleTest.prototype.testDouble = function() { this.assertEquals(4, double(2)); };\n",
        ));
        let suites = vec![SuiteSpec::new("Double", DiscoveryMode::TestCases, &reports).with_source(user)];

        let aggregate = SuiteOrchestrator::new(dir.path())
            .with_global_sources(vec![shared])
            .run_all(suites)
            .unwrap();
        assert_eq!((aggregate.tests, aggregate.errors, aggregate.failures), (1, 0, 0));
    }

    #[test]
    fn test_skip_exec_honours_suite_charset() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        std::fs::write(
            dir.path().join("CafeTest.js"),
            b"var greeting = 'caf\xE9';\n".as_slice(),
        )
        .unwrap();
        let suite = || {
            vec![
                SuiteSpec::new("Cafe", DiscoveryMode::TestCases, &reports)
                    .with_charset(Charset::Latin1)
                    .with_file("CafeTest.js"),
            ]
        };

        let checked = SuiteOrchestrator::new(dir.path())
            .skip_exec(true)
            .run_all(suite())
            .unwrap();
        assert_eq!(checked.suites[0].units, 1);

        let ran = SuiteOrchestrator::new(dir.path()).run_all(suite()).unwrap();
        assert_eq!(ran.tests, 0);
    }

    #[test]
    fn test_suite_names_cannot_escape_reports_dir() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        for name in ["a/b", "../Outside", "a\\b"] {
            let suites = vec![SuiteSpec::new(name, DiscoveryMode::TestCases, &reports).with_source(passing("Named"))];
            let err = SuiteOrchestrator::new(dir.path()).execute(suites).unwrap_err();
            assert!(matches!(err, ScriptestError::Config(_)), "{} accepted", name);
        }
        assert!(!reports.exists());
        assert!(validate_suite_name("Calculator.v2").is_ok());
    }

    #[test]
    fn test_recursive_code_under_test() {
        let dir = TempDir::new().unwrap();
        let reports = dir.path().join("reports");
        let source = SourceSelector::Inline(SourceUnit::new(
            "RecursionTest.js",
            "function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); }\n\
             function count(n) { return n === 0 ? 0 : 1 + count(n - 1); }\n\
             function RecursionTest(name) { TestCase.call(this, name); }\n\
             RecursionTest.prototype = new TestCase();\n\
             RecursionTest.prototype.testFact = function() { this.assertEquals(120, fact(5)); fact(100); };\n\
             RecursionTest.prototype.testDeep = function() { this.assertEquals(1000, count(1000)); };\n",
        ));
        let suites = vec![SuiteSpec::new("Recursion", DiscoveryMode::TestCases, &reports).with_source(source)];

        let aggregate = SuiteOrchestrator::new(dir.path()).run_all(suites).unwrap();
        assert_eq!((aggregate.tests, aggregate.errors, aggregate.failures), (2, 0, 0));
    }
}
