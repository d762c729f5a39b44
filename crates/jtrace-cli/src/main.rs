mod report;

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use jtrace_config::{init_tracing, LoggingConfig, TracerConfig};
use jtrace_engine::{compile, trace, valid_breakpoint_lines, FormatOptions, TraceSerializer};

use crate::report::Selection;

#[derive(Parser)]
#[command(
    name = "jtrace",
    version,
    about = "Trace a single-file Java program into execution-tutor snapshots"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// TOML config file (java/javac paths, attach retries, logging)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the full error chain on failure and enable debug logs
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Java source file to read (defaults to stdin)
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the program and print trace documents
    Trace(TraceArgs),
    /// Print which source lines can hold a breakpoint
    ListBreakpoints(ListBreakpointsArgs),
}

#[derive(Args)]
struct TraceArgs {
    /// Hide `main`'s `args` parameter
    #[arg(long)]
    remove_main_args: bool,
    /// Show strings inline instead of as heap objects
    #[arg(short = 's', long)]
    inline_strings: bool,
    /// Hide `this` in instance method frames
    #[arg(long)]
    remove_method_this: bool,
    /// Print every hit of a breakpoint instead of only the last one
    #[arg(long)]
    accumulate_breakpoints: bool,
    /// Lines to stop at; -1 is the end of `main`
    #[arg(
        short = 'b',
        long,
        num_args = 1..,
        value_delimiter = ',',
        allow_negative_numbers = true
    )]
    breakpoints: Option<Vec<i32>>,
}

#[derive(Args)]
struct ListBreakpointsArgs {
    /// Emit JSON instead of an annotated listing
    #[arg(short, long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => TracerConfig::load_from_path(path)?,
        None => TracerConfig::default(),
    }
    .with_env_overrides();
    if cli.verbose && config.logging.level == LoggingConfig::default().level {
        config.logging.level = "debug".to_owned();
    }
    init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let (outcome, failure) = match &cli.command {
        Command::Trace(args) => (
            runtime.block_on(run_trace(args, cli.input.as_deref(), &config)),
            "Unable to generate trace!",
        ),
        Command::ListBreakpoints(args) => (
            runtime.block_on(run_list_breakpoints(args, cli.input.as_deref(), &config)),
            "Unable to list breakpoints!",
        ),
    };

    match outcome {
        Ok(out) => {
            print!("{out}");
            Ok(0)
        }
        Err(err) => {
            tracing::debug!(target: "jtrace.cli", error = %format!("{err:#}"), "command failed");
            eprintln!("{failure}");
            if cli.verbose {
                eprintln!("{:#}", err);
            }
            Ok(1)
        }
    }
}

async fn run_trace(args: &TraceArgs, input: Option<&Path>, config: &TracerConfig) -> Result<String> {
    let source = read_source(input)?;
    let program = compile(&source, config).await?;
    let result = trace(&program, args.breakpoints.as_deref(), config).await?;

    let serializer = TraceSerializer::new(FormatOptions {
        remove_main_args: args.remove_main_args,
        inline_strings: args.inline_strings,
        remove_method_this: args.remove_method_this,
    });
    let selection = match (&args.breakpoints, args.accumulate_breakpoints) {
        (None, _) => Selection::MainExit,
        (Some(_), false) => Selection::LastHit,
        (Some(_), true) => Selection::EveryHit,
    };
    let output = report::trace_output(&result, &source, &serializer, selection)?;
    Ok(format!("{}\n", serde_json::to_string(&output)?))
}

async fn run_list_breakpoints(
    args: &ListBreakpointsArgs,
    input: Option<&Path>,
    config: &TracerConfig,
) -> Result<String> {
    let source = read_source(input)?;
    let program = compile(&source, config).await?;
    let valid = valid_breakpoint_lines(&program, config).await?;

    let entries = report::breakpoint_entries(&source, &valid);
    if args.json {
        Ok(format!("{}\n", serde_json::to_string(&entries)?))
    } else {
        Ok(report::breakpoint_listing(&entries))
    }
}

/// The whole input with every line terminated by `\n`.
fn read_source(input: Option<&Path>) -> Result<String> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read source from stdin")?;
            buf
        }
    };
    Ok(raw.lines().map(|line| format!("{line}\n")).collect())
}
