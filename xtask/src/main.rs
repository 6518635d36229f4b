//! Workspace automation: runs the criterion benchmark suite with the
//! feature combinations worth comparing (the `tracing` sink has a cost
//! even when nothing is subscribed; `static-buffer` swaps the allocation
//! path from a caller-owned buffer to the global singleton).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "tessera workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the criterion benchmark suite.
    Bench {
        /// Also run with the `static-buffer` feature enabled.
        #[arg(long, default_value_t = false)]
        static_buffer: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Bench { static_buffer } => run_benchmarks(static_buffer),
    }
}

fn run_benchmarks(static_buffer: bool) -> Result<()> {
    run(&["bench"])?;
    if static_buffer {
        println!("\n>>> Benchmarking with --features static-buffer");
        run(&["bench", "--features", "static-buffer"])?;
    }
    Ok(())
}

fn run(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        bail!("cargo {:?} failed", args);
    }
    Ok(())
}
