mod cli;
mod commands;
mod config;
mod fetch;
mod paths;
mod progress;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match run(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Install(args) => commands::install::run(ctx, args),
        Command::Plan(args) => commands::plan::run(ctx, args),
        Command::Info { name, json } => commands::info::run(ctx, &name, json),
        Command::List { installed } => commands::list::run(ctx, installed),
        Command::Test { name } => commands::test::run(ctx, &name),
        Command::Config(cmd) => commands::config::run(ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "formulary", &mut io::stdout());
            Ok(())
        }
    }
}

/// Print an error; engine errors get their category advice
fn report(err: &anyhow::Error) {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<formulakit::Error>())
    {
        Some(engine_err) => ui::fatal(engine_err),
        None => ui::error(&format!("{err:#}")),
    }
}
