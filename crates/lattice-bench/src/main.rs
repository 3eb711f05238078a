//! lattice-bench: replays a load/run trace pair against one index kind.
//!
//! Usage:
//!   lattice-bench <load-trace> <run-trace> <index-kind> <threads> <key-size> <value-size>
//!
//! Example:
//!   lattice-bench traces/load.txt traces/run.txt bplus-tree 8 64B 1KB

use clap::Parser;
use lattice_common::{parse_size, IndexKind, Result, RunConfig};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

mod runner;
mod trace;

use runner::Runner;

#[derive(Parser, Debug)]
#[command(name = "lattice-bench")]
#[command(about = "Concurrent index workload driver")]
#[command(version)]
struct Args {
    /// Trace replayed single-threaded to populate the index
    load_trace: PathBuf,

    /// Trace replayed by the worker pool
    run_trace: PathBuf,

    /// Index kind: skip-list, inverted-index, or bplus-tree
    index_kind: String,

    /// Worker thread count: 1, 4, 8, or 16
    threads: usize,

    /// Key size, e.g. 64B or 256B
    key_size: String,

    /// Value size, e.g. 64B, 256B, 1KB, or 4KB
    value_size: String,
}

fn run(args: &Args) -> Result<()> {
    let kind: IndexKind = args.index_kind.parse()?;
    let config = RunConfig {
        kind,
        threads: args.threads,
        key_size: parse_size(&args.key_size)?,
        value_size: parse_size(&args.value_size)?,
    };
    config.validate()?;

    info!(
        "index={} threads={} key_size={}B value_size={}B",
        config.kind, config.threads, config.key_size, config.value_size
    );

    let mut runner = Runner::new(config.clone());
    runner.load_phase(&args.load_trace)?;
    let report = runner.run_phase(&args.run_trace)?;

    println!("index:      {}", config.kind);
    println!("threads:    {}", config.threads);
    println!("operations: {}", report.operations);
    println!("elapsed:    {:.6} s", report.elapsed.as_secs_f64());
    println!("throughput: {:.0} ops/sec", report.throughput());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // clap's own exit would report status 2; argument errors
            // exit 1, while --help/--version still exit 0
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
