mod cli;
mod config;
mod content;
mod detach;
mod provider;
mod selection;
#[cfg(test)]
mod testing;
mod x11;

use clap::Parser;
use cli::Cli;
use provider::X11ClipboardProvider;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    let provider = X11ClipboardProvider::new(&config);

    if let Err(e) = cli::run(cli.command, &provider) {
        tracing::error!(error = %e, "command failed");
        eprintln!("clipsel: {e}");
        std::process::exit(1);
    }
}
