use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    filter, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, Layer,
};

/// Subscriber settings shared by the binaries.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: String,
    pub console: bool,
    /// Directory for the daily-rolling log file, if any.
    pub file_dir: Option<String>,
    pub file_name: String,
    /// Binary target logged alongside the library, e.g. `ss_chain_server`.
    pub bin_target: &'static str,
}

pub fn parse_level(level: &str) -> tracing::Level {
    match level {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

fn targets(opts: &LogOptions, level: LevelFilter) -> filter::Targets {
    filter::Targets::new()
        .with_target(opts.bin_target, level)
        .with_target("ss_chain", level)
        .with_target("audit", level)
}

/// Installs the global subscriber. Must be called at most once.
pub fn init(opts: &LogOptions) {
    let formatter = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(true);

    let file_level = LevelFilter::from(parse_level(&opts.level));
    let console_level = if opts.console {
        file_level
    } else {
        LevelFilter::OFF
    };

    let layer = tracing_subscriber::registry().with(
        targets(opts, console_level)
            .and_then(tracing_subscriber::fmt::layer().event_format(formatter.clone())),
    );

    if let Some(dir) = &opts.file_dir {
        let file_appender = tracing_appender::rolling::daily(dir, &opts.file_name);
        layer
            .with(
                targets(opts, file_level).and_then(
                    tracing_subscriber::fmt::layer()
                        .event_format(formatter)
                        .with_writer(file_appender)
                        .with_ansi(false),
                ),
            )
            .init();
    } else {
        layer.init();
    }
}
