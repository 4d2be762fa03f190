//! A minimal demonstration shell over the engine facade (§6's
//! `[EXPANSION] quereus-cli`): opens a `Database` with the in-memory module
//! registered as the default, reads a script (via `-c`, a file argument,
//! or stdin), and runs it one statement at a time. This crate is a
//! terminal harness for exercising `quereus`, not part of the engine's
//! tested-invariant surface — it is not a SQL front end.

mod cli;
mod dsl;
mod logger;
mod runner;

pub use cli::Cli;

use clap::Parser as _;
use quereus::{Database, EngineConfig};

/// Parses `args` as a `Cli`, runs its script against a fresh in-memory
/// `Database`, and returns the process exit code: `0` on success, `1` on
/// any failure to read input or run a statement (§6's CLI conventions).
pub fn run_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let _ = logger::init(cli.verbose);

    let script = match cli.read_input() {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let db = Database::open(EngineConfig::default());
    let conn = db.connect();

    match runner::run_script(&conn, &script) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}
