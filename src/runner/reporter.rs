use crate::runner::types::{RunResult, TestCaseResult, TestOutcome};
use colored::Colorize;
use std::fmt::Write;

/// 控制台摘要输出
pub struct TestReporter {
    verbose: bool,
}

impl TestReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// 打印套件运行摘要
    pub fn print_summary(&self, run: &RunResult) {
        print!("{}", self.render(run));
    }

    /// 渲染摘要文本：失败与错误的测试逐条列出，verbose 时也列出通过的测试
    pub fn render(&self, run: &RunResult) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", "━".repeat(50));
        let _ = writeln!(out, "{} {}", "Suite".bold(), run.name);
        let _ = writeln!(out, "{}", "━".repeat(50));

        for case in &run.cases {
            if self.verbose || !case.is_passed() {
                render_case(&mut out, case);
            }
        }

        let counts = &run.counts;
        if counts.failures == 0 && counts.errors == 0 {
            let _ = writeln!(
                out,
                "  {}: {} passed, {} total",
                "Tests".bold(),
                counts.passed().to_string().green(),
                counts.tests
            );
        } else {
            let _ = writeln!(
                out,
                "  {}: {} passed, {} failed, {} errors, {} total",
                "Tests".bold(),
                counts.passed().to_string().green(),
                counts.failures.to_string().red(),
                counts.errors.to_string().red(),
                counts.tests
            );
        }
        let _ = writeln!(
            out,
            "  {}: {:.3}s",
            "Duration".bold(),
            run.duration.as_secs_f64()
        );
        out
    }
}

fn render_case(out: &mut String, case: &TestCaseResult) {
    let symbol = match case.outcome {
        TestOutcome::Passed => "✓".green(),
        TestOutcome::Failure => "✗".red(),
        TestOutcome::Error => "!".red().bold(),
    };
    let _ = writeln!(
        out,
        " {} {}.{} ({}ms)",
        symbol,
        case.classname.cyan(),
        case.name,
        case.duration.as_millis()
    );
    if let (Some(kind), Some(message)) = (&case.kind, &case.message) {
        let _ = writeln!(out, "   {}: {}", kind.red(), message);
    }
}

impl Default for TestReporter {
    fn default() -> Self {
        Self::new(false)
    }
}
