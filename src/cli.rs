use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, Table};
use scriptest::config::{ConfigLoader, ScriptestConfig};
use scriptest::orchestrator::{AggregateResult, Verdict};
use scriptest::script::with_script_stack;
use scriptest::{ScriptContext, SourceUnit};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Runs JsUnit-style script tests and writes JUnit XML reports", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 运行配置中声明的所有测试套件
    Run(RunArgs),

    /// 只加载源码，检查语法
    Check {
        /// 配置文件路径（默认向上查找 scriptest.toml）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 把脚本加载进同一个环境，并输出表达式的值
    Eval {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// 加载完成后求值的表达式
        #[arg(short, long)]
        expr: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// 配置文件路径（默认向上查找 scriptest.toml）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 覆盖报告目录
    #[arg(long)]
    pub reports_dir: Option<PathBuf>,

    /// 每个套件结束后打印摘要
    #[arg(long)]
    pub summary: bool,

    /// 有错误时不以失败退出
    #[arg(long)]
    pub no_halt_on_error: bool,

    /// 有断言失败时不以失败退出
    #[arg(long)]
    pub no_halt_on_failure: bool,

    /// 以 JSON 输出累计结果
    #[arg(long)]
    pub json: bool,
}

/// 命令行参数覆盖配置文件
fn apply_overrides(config: &mut ScriptestConfig, args: &RunArgs) -> Result<()> {
    if let Some(dir) = &args.reports_dir {
        config.reports_dir = std::path::absolute(dir)
            .with_context(|| format!("Invalid reports directory: {}", dir.display()))?;
    }
    if args.summary {
        config.print_summary = true;
    }
    if args.no_halt_on_error {
        config.halt_on_error = false;
    }
    if args.no_halt_on_failure {
        config.halt_on_failure = false;
    }
    Ok(())
}

pub fn run(args: RunArgs) -> Result<()> {
    let mut config = ConfigLoader::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args)?;
    if config.skip {
        tracing::info!("Skipping all suites (skip = true)");
        return Ok(());
    }
    config.validate()?;

    let orchestrator = config.orchestrator()?;
    let aggregate = orchestrator.execute(config.suite_specs()?)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&aggregate)?);
    } else {
        print_aggregate(&aggregate);
    }
    aggregate.into_result()?;
    Ok(())
}

pub fn check(config: Option<PathBuf>) -> Result<()> {
    let mut config = ConfigLoader::load(config.as_deref())?;
    config.skip_exec = true;
    config.validate()?;

    let aggregate = config.orchestrator()?.execute(config.suite_specs()?)?;
    let units: usize = aggregate.suites.iter().map(|suite| suite.units).sum();
    println!("{} {} source units loaded", "✓".green(), units);
    Ok(())
}

pub fn eval(files: Vec<PathBuf>, expr: Option<String>) -> Result<()> {
    with_script_stack(move || -> Result<()> {
        let mut context = ScriptContext::new()?;
        let mut scope = context.enter();
        for path in &files {
            scope.load(SourceUnit::from_file(path, None)?)?;
        }

        let value = match expr {
            Some(code) => Some(scope.evaluate(&code, "<expr>")?),
            None => None,
        };
        for line in scope.take_output() {
            println!("{}", line);
        }
        match value {
            Some(value) => println!("{}", value),
            None => println!("{} {} files loaded", "✓".green(), files.len()),
        }
        Ok(())
    })?
}

/// 每个套件一行的结果表
fn render_table(aggregate: &AggregateResult) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Suite", "Mode", "Tests", "Failures", "Errors", "Duration", "Report"]);

    for suite in &aggregate.suites {
        let count_cell = |count: u64| {
            if count > 0 {
                Cell::new(count).fg(Color::Red)
            } else {
                Cell::new(count)
            }
        };
        let report = suite
            .report
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&suite.name),
            Cell::new(suite.mode),
            Cell::new(suite.tests),
            count_cell(suite.failures),
            count_cell(suite.errors),
            Cell::new(format!("{}ms", suite.duration.as_millis())),
            Cell::new(report).add_attribute(Attribute::Dim),
        ]);
    }
    table
}

fn print_aggregate(aggregate: &AggregateResult) {
    println!("{}", render_table(aggregate));
    let verdict = match aggregate.verdict {
        Verdict::Passed => "PASSED".green().bold(),
        Verdict::Warned => "PASSED WITH PROBLEMS".yellow().bold(),
        Verdict::Failed => "FAILED".red().bold(),
    };
    println!(
        "{}: {} tests, {} failures, {} errors",
        verdict, aggregate.tests, aggregate.failures, aggregate.errors
    );
}
