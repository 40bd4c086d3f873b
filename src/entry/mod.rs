//! Binary entry point: arguments, config file, logging, runtime, and output.
use std::ffi::OsString;
use std::process::ExitCode;

use clap::{ArgMatches, CommandFactory, FromArgMatches};

use crate::args::LoadArgs;
use crate::config::{apply_config, load_config};
use crate::error::{AppError, AppResult};
use crate::logger::init_logging;
use crate::runner::Runner;
use crate::shutdown::setup_signal_stop_handler;
use crate::sinks::emit_summary;

const EXIT_FAILURE: u8 = 1;
const EXIT_STARTUP: u8 = 2;

/// Parses the command line, executes one run, and prints its summary.
#[must_use]
pub fn run() -> ExitCode {
    run_from(std::env::args_os())
}

fn run_from<I>(raw_args: I) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
{
    let (args, matches) = match parse_args(raw_args) {
        Ok(parsed) => parsed,
        Err(code) => return code,
    };

    let result = prepare(args, &matches).and_then(|args| {
        init_logging(args.verbose, args.no_color);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(run_async(args))
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => exit_code_for(&err),
    }
}

fn parse_args<I>(raw_args: I) -> Result<(LoadArgs, ArgMatches), ExitCode>
where
    I: IntoIterator<Item = OsString>,
{
    let parsed = LoadArgs::command()
        .try_get_matches_from(raw_args)
        .and_then(|matches| {
            LoadArgs::from_arg_matches(&matches).map(|args| (args, matches))
        });
    match parsed {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            if let Err(print_err) = err.print() {
                eprintln!("Failed to print usage: {}", print_err);
            }
            if err.use_stderr() {
                Err(ExitCode::from(EXIT_FAILURE))
            } else {
                Err(ExitCode::SUCCESS)
            }
        }
    }
}

fn prepare(mut args: LoadArgs, matches: &ArgMatches) -> AppResult<LoadArgs> {
    if let Some(config) = load_config(args.config.as_deref())? {
        apply_config(&mut args, matches, &config)?;
    }
    Ok(args)
}

async fn run_async(args: LoadArgs) -> AppResult<()> {
    let config = args.to_run_config()?;
    let runner = Runner::new(config);
    let signals = setup_signal_stop_handler(runner.stop_trigger());
    let outcome = runner.run().await;
    signals.abort();

    let summary = outcome?;
    emit_summary(&summary, args.output_format(), args.output.as_deref()).await
}

fn exit_code_for(err: &AppError) -> ExitCode {
    if let Some(startup) = err.startup_failure() {
        eprintln!("volley: run aborted before sending traffic: {}", startup);
        return ExitCode::from(EXIT_STARTUP);
    }
    eprintln!("volley: {}", err);
    ExitCode::from(EXIT_FAILURE)
}
