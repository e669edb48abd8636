mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    // 初始化日志系统
    scriptest::logger::init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => cli::run(args)?,
        Commands::Check { config } => cli::check(config)?,
        Commands::Eval { files, expr } => cli::eval(files, expr)?,
    }
    Ok(())
}
