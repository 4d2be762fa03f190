//! Installs a `fern`-based logger gated by the `QUEREUS_LOG` environment
//! variable, exactly as the corpus's own CLI tooling gates its logger by
//! `SQRUFF_LOG`. The engine library itself only ever calls the `log`
//! macros; `init` is an opt-in convenience for embedders that don't
//! already have a subscriber installed, never called automatically.
pub fn init() -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(
            std::env::var("QUEREUS_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(log::LevelFilter::Off),
        )
        .chain(std::io::stderr())
        .apply()
}
