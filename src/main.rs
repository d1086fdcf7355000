mod cli;
mod config;
mod engine;
mod error;
mod llm;
mod logging;
mod runner;
mod sink;
mod source;
mod translator;
mod ui;

use std::process::ExitCode;

use clap::Parser;
use cli::Cli;
use console::Style;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match runner::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", Style::new().red().bold().apply_to("error:"));
            ExitCode::FAILURE
        }
    }
}
