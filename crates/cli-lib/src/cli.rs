use std::io::Read;
use std::path::PathBuf;

use clap::Parser;

/// A terminal front end for the embeddable engine (§6). Input is the tiny
/// statement language in `dsl`, not full SQL — this crate is a
/// demonstration harness over the facade, not a SQL front end.
#[derive(Debug, Parser)]
#[command(name = "quereus", version, about = "Run statements against an in-memory Quereus database")]
pub struct Cli {
    /// Run this text (one or more `;`-separated statements) and exit,
    /// instead of reading from a file or stdin.
    #[arg(short = 'c', long = "command")]
    pub command: Option<String>,

    /// Read statements from this file instead of stdin.
    pub script: Option<PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv). Overridden by
    /// QUEREUS_LOG if set.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub(crate) fn read_input(&self) -> std::io::Result<String> {
        if let Some(command) = &self.command {
            return Ok(command.clone());
        }
        if let Some(path) = &self.script {
            return std::fs::read_to_string(path);
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    }
}
