use crate::context::{Charset, ContextScope};
use crate::discovery::DiscoveryMode;
use crate::error::{Result, ScriptestError};
use crate::report::{ReportDocument, ReportSink};
use crate::runner::executor::TestExecutor;
use crate::runner::reporter::TestReporter;
use crate::runner::types::{RunCounts, RunResult};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

/// 发现、执行并生成套件报告
#[derive(Debug, Clone, Default)]
pub struct TestReportGenerator {
    print_summary: bool,
    verbose: bool,
    charset: Charset,
}

impl TestReportGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 运行后在控制台打印摘要
    pub fn with_summary(mut self, print_summary: bool) -> Self {
        self.print_summary = print_summary;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    /// 运行测试并将完整报告写入 `destination`
    ///
    /// 无论成功与否目标都会被关闭：成功时 `close`，出错时 `discard`。
    pub fn run<S: ReportSink>(
        &self,
        scope: &mut ContextScope<'_>,
        mode: DiscoveryMode,
        suite_name: Option<&str>,
        destination: &mut S,
    ) -> Result<RunResult> {
        let run = match self.generate(scope, mode, suite_name) {
            Ok(run) => run,
            Err(err) => {
                discard(destination);
                return Err(err);
            }
        };

        if let Err(source) = write_report(destination, &run.report) {
            discard(destination);
            return Err(write_error(destination, source));
        }
        destination
            .close()
            .map_err(|source| write_error(destination, source))?;

        if self.print_summary {
            TestReporter::new(self.verbose).print_summary(&run);
        }
        Ok(run)
    }

    fn generate(
        &self,
        scope: &mut ContextScope<'_>,
        mode: DiscoveryMode,
        suite_name: Option<&str>,
    ) -> Result<RunResult> {
        let mut scope = scope.enter();
        let start = Instant::now();
        let timestamp = chrono::Local::now().naive_local();

        // 加载阶段的输出不属于本次运行
        let earlier = scope.take_output();
        if !earlier.is_empty() {
            tracing::debug!(lines = earlier.len(), "Dropping output printed while loading");
        }

        let discovery = mode.strategy().discover(&mut scope, suite_name)?;
        tracing::info!(
            suite = %discovery.title,
            mode = %mode,
            entities = discovery.entities.len(),
            "Running tests"
        );

        let cases = TestExecutor::new(&mut scope).execute_all(&discovery.entities);
        let output = scope.take_output();
        let counts = RunCounts::from_results(&cases);
        let duration = start.elapsed();

        let report = ReportDocument {
            name: &discovery.title,
            counts,
            duration,
            timestamp,
            cases: &cases,
            output: &output,
        }
        .render(self.charset)?;

        tracing::info!(
            suite = %discovery.title,
            tests = counts.tests,
            failures = counts.failures,
            errors = counts.errors,
            "Tests finished"
        );

        Ok(RunResult {
            name: discovery.title,
            counts,
            duration,
            timestamp,
            cases,
            output,
            report,
        })
    }
}

fn write_report<S: ReportSink>(destination: &mut S, report: &[u8]) -> io::Result<()> {
    destination.write_all(report)?;
    destination.flush()
}

fn discard<S: ReportSink>(destination: &mut S) {
    if let Err(err) = destination.discard() {
        tracing::warn!("Failed to discard incomplete report: {}", err);
    }
}

fn write_error<S: ReportSink>(destination: &S, source: io::Error) -> ScriptestError {
    ScriptestError::ReportWrite {
        path: destination
            .location()
            .map(|path| path.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("<memory>")),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ScriptContext, SourceUnit};
    use crate::report::parse_summary;

    const CALCULATOR: &str = r#"
        function CalculatorTest(name) { TestCase.call(this, name); }
        CalculatorTest.prototype = new TestCase();
        CalculatorTest.prototype.testAdd = function() {
            print("adding");
            this.assertEquals(4, 2 + 2);
        };
        CalculatorTest.prototype.testSub = function() {
            this.assertEquals("subtraction", -1, 2 - 1);
        };
        CalculatorTest.prototype.testBroken = function() {
            undefinedFunction();
        };
    "#;

    /// 记录关闭方式的目标，可在写入时失败
    #[derive(Default)]
    struct RecordingSink {
        bytes: Vec<u8>,
        fail_writes: bool,
        closed: bool,
        discarded: bool,
    }

    impl Write for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::other("no space left"));
            }
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ReportSink for RecordingSink {
        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }

        fn discard(&mut self) -> io::Result<()> {
            self.discarded = true;
            self.bytes.clear();
            Ok(())
        }
    }

    fn context(source: &str) -> ScriptContext {
        let mut context = ScriptContext::new().unwrap();
        context.load(SourceUnit::new("CalculatorTest.js", source)).unwrap();
        context
    }

    #[test]
    fn test_run_writes_complete_report() {
        let mut context = context(CALCULATOR);
        let mut scope = context.enter();
        let mut sink = RecordingSink::default();

        let run = TestReportGenerator::new()
            .run(&mut scope, DiscoveryMode::TestCases, Some("Calculator"), &mut sink)
            .unwrap();

        assert!(sink.closed);
        assert!(!sink.discarded);
        assert_eq!(sink.bytes, run.report);
        assert_eq!(run.name, "Calculator");
        assert_eq!(run.counts.tests, 3);
        assert_eq!(run.counts.failures, 1);
        assert_eq!(run.counts.errors, 1);
        assert_eq!(run.output, vec!["adding".to_string()]);

        let summary = parse_summary(&sink.bytes, Charset::Utf8, "Calculator").unwrap();
        assert_eq!((summary.tests, summary.errors, summary.failures), (3, 1, 1));

        let xml = String::from_utf8(sink.bytes).unwrap();
        assert!(xml.contains("message=\"subtraction expected:&lt;-1&gt; but was:&lt;1&gt;\""));
        assert!(xml.contains("type=\"ReferenceError\""));
    }

    #[test]
    fn test_write_failure_discards_destination() {
        let mut context = context(CALCULATOR);
        let mut scope = context.enter();
        let mut sink = RecordingSink {
            fail_writes: true,
            ..Default::default()
        };

        let err = TestReportGenerator::new()
            .run(&mut scope, DiscoveryMode::TestCases, None, &mut sink)
            .unwrap_err();

        assert!(matches!(err, ScriptestError::ReportWrite { ref path, .. } if path == &PathBuf::from("<memory>")));
        assert!(sink.discarded);
        assert!(!sink.closed);
    }

    #[test]
    fn test_discovery_failure_leaves_no_report() {
        let mut context = context("var AllTests = 42;");
        let mut scope = context.enter();
        let mut sink = RecordingSink::default();

        let err = TestReportGenerator::new()
            .run(&mut scope, DiscoveryMode::AllTests, None, &mut sink)
            .unwrap_err();

        assert!(matches!(err, ScriptestError::ScriptEvaluation { .. }));
        assert!(sink.discarded);
        assert!(sink.bytes.is_empty());
    }

    #[test]
    fn test_empty_discovery_is_well_formed() {
        let mut context = context("var nothing = 1;");
        let mut scope = context.enter();
        let mut report: Vec<u8> = Vec::new();

        let run = TestReportGenerator::new()
            .run(&mut scope, DiscoveryMode::TestSuites, None, &mut report)
            .unwrap();

        assert_eq!(run.name, "AllTestSuites");
        let summary = parse_summary(&report, Charset::Utf8, "AllTestSuites").unwrap();
        assert_eq!((summary.tests, summary.errors, summary.failures), (0, 0, 0));
    }

    #[test]
    fn test_runs_leave_scope_depth_unchanged() {
        let mut context = context(CALCULATOR);
        let mut scope = context.enter();
        let generator = TestReportGenerator::new();
        generator
            .run(&mut scope, DiscoveryMode::TestCases, None, &mut Vec::<u8>::new())
            .unwrap();
        let second = generator
            .run(&mut scope, DiscoveryMode::TestCases, None, &mut Vec::<u8>::new())
            .unwrap();
        assert_eq!(scope.depth(), 1);
        assert_eq!(second.counts.tests, 3);
    }
}
