use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{Config, Selection};
use crate::content::{ClipboardContent, PathsAction};
use crate::provider::{ClipboardProvider, ProviderError};

#[derive(Parser)]
#[command(name = "clipsel", about = "Cut, copy and paste through the X11 clipboard")]
pub struct Cli {
    /// Selection to operate on
    #[arg(long, global = true, value_enum, default_value_t = Selection::Clipboard)]
    pub selection: Selection,

    /// Ceiling for synchronous protocol waits, in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Copy files, or stdin if no paths are given
    Copy {
        paths: Vec<PathBuf>,

        /// Serve the selection from this process instead of detaching
        #[arg(long)]
        foreground: bool,
    },

    /// Cut files
    Cut {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Serve the selection from this process instead of detaching
        #[arg(long)]
        foreground: bool,
    },

    /// Write the clipboard to stdout
    Paste,

    /// List the targets the clipboard owner offers
    Targets,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Cli {
    pub fn config(&self) -> Config {
        let mut config = Config {
            selection: self.selection,
            ..Config::default()
        };
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Command::Copy { foreground, .. } | Command::Cut { foreground, .. } = self.command {
            config.foreground = foreground;
        }
        config
    }
}

pub fn run(command: Command, provider: &dyn ClipboardProvider) -> Result<(), CommandError> {
    match command {
        Command::Copy { paths, .. } if paths.is_empty() => {
            let mut data = Vec::new();
            io::stdin().lock().read_to_end(&mut data)?;
            provider.write(ClipboardContent::from_bytes(data))?;
        }
        Command::Copy { paths, .. } => {
            let paths = absolute_paths(&paths, &std::env::current_dir()?);
            provider.write(ClipboardContent::paths(paths, PathsAction::Copy))?;
        }
        Command::Cut { paths, .. } => {
            let paths = absolute_paths(&paths, &std::env::current_dir()?);
            provider.write(ClipboardContent::paths(paths, PathsAction::Cut))?;
        }
        Command::Paste => {
            let content = provider.read();
            let mut stdout = io::stdout().lock();
            render(&content, &mut stdout)?;
            stdout.flush()?;
        }
        Command::Targets => {
            let mut stdout = io::stdout().lock();
            for target in provider.targets()? {
                writeln!(stdout, "{target}")?;
            }
        }
    }
    Ok(())
}

/// Resolve relative paths against `cwd`; the daemon runs from `/`.
fn absolute_paths(paths: &[PathBuf], cwd: &Path) -> Vec<PathBuf> {
    paths
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { cwd.join(p) })
        .collect()
}

/// Text and binary content verbatim, paths one per line.
fn render(content: &ClipboardContent, out: &mut dyn Write) -> io::Result<()> {
    match content {
        ClipboardContent::Empty => Ok(()),
        ClipboardContent::Text { text, .. } => out.write_all(text.as_bytes()),
        ClipboardContent::Binary { data, .. } => out.write_all(data),
        ClipboardContent::Paths { paths, .. } => {
            for path in paths {
                writeln!(out, "{}", path.display())?;
            }
            Ok(())
        }
    }
}
