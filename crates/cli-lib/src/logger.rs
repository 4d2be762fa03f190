pub(crate) fn init(verbose: u8) -> Result<(), log::SetLoggerError> {
    let level = std::env::var("QUEREUS_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(match verbose {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        });
    fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(level)
        .chain(std::io::stderr())
        .apply()
}
