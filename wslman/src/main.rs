// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Installs and inspects WSL root filesystems.

mod commands;
mod tracing_init;

use clap::Parser;
use clap::Subcommand;

/// Common trait implemented by all subcommands.
trait Cmd: clap::Parser {
    fn run(self) -> anyhow::Result<()>;
}

#[derive(Parser)]
#[clap(name = "wslman", about = "Manage WSL root filesystems")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Detect(commands::Detect),
    Install(commands::Install),
    Stat(commands::Stat),
    Readlink(commands::Readlink),
}

fn main() {
    if let Err(e) = tracing_init::enable_tracing() {
        eprintln!("{:#}", e);
    }

    if let Err(e) = try_main() {
        tracing::error!(error = ?e, "wslman failed");
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Commands::Detect(cmd) => cmd.run(),
        Commands::Install(cmd) => cmd.run(),
        Commands::Stat(cmd) => cmd.run(),
        Commands::Readlink(cmd) => cmd.run(),
    }
}
