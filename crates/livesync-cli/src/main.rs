use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use livesync_cli::{normalize_lines, tail, timestamp_literal};
use livesync_core::bus::Filter;
use livesync_core::event::TimestampNormalizer;
use livesync_core::{telemetry, FeedConfig, LogFormat};
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("livesync")
        .version(livesync_core::VERSION)
        .about("Real-time change-feed ingestion and reconciliation")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log level when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("tail")
                .about("Follow a WebSocket change feed and print normalized events")
                .arg(
                    Arg::new("endpoint")
                        .long("endpoint")
                        .help("ws:// or wss:// URL (overrides the config file)"),
                )
                .arg(
                    Arg::new("subscribe")
                        .long("subscribe")
                        .help("Text frame sent after each connect"),
                )
                .arg(
                    Arg::new("collection")
                        .long("collection")
                        .help("Only print events of this collection"),
                )
                .arg(
                    Arg::new("entity")
                        .long("entity")
                        .help("Only print events for this entity id"),
                )
                .arg(
                    Arg::new("pretty")
                        .long("pretty")
                        .action(ArgAction::SetTrue)
                        .help("Pretty-print JSON"),
                ),
        )
        .subcommand(
            Command::new("normalize")
                .about("Read JSON-lines envelopes from stdin, print canonical events")
                .arg(
                    Arg::new("pretty")
                        .long("pretty")
                        .action(ArgAction::SetTrue)
                        .help("Pretty-print JSON"),
                ),
        )
        .subcommand(
            Command::new("timestamp")
                .about("Print the canonical millisecond value of a timestamp literal")
                .arg(
                    Arg::new("value")
                        .required(true)
                        .help("Epoch seconds or millis, ISO text, or {\"seconds\":..} JSON"),
                )
                .arg(
                    Arg::new("iso")
                        .long("iso")
                        .action(ArgAction::SetTrue)
                        .help("Also print RFC 3339"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<FeedConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => FeedConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FeedConfig::default(),
    };
    if let Some(level) = matches.get_one::<String>("log-level") {
        config = config.with_log_level(level.clone());
    }
    if matches.get_flag("log-json") {
        config = config.with_log_format(LogFormat::Json);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let mut config = load_config(&matches)?;
    telemetry::init(&config.log.level, config.log.format);

    match matches.subcommand() {
        Some(("tail", args)) => {
            if let Some(endpoint) = args.get_one::<String>("endpoint") {
                config = config.with_endpoint(endpoint.clone());
            }
            if let Some(message) = args.get_one::<String>("subscribe") {
                config = config.with_subscribe_message(message.clone());
            }
            config.validate()?;

            let mut filter = match args.get_one::<String>("collection") {
                Some(collection) => Filter::collection(collection.clone()),
                None => Filter::all(),
            };
            if let Some(id) = args.get_one::<String>("entity") {
                filter = filter.with_entity(id.clone());
            }
            tail(&config, filter, args.get_flag("pretty")).await?;
        }
        Some(("normalize", args)) => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            let summary = normalize_lines(
                &config.normalizer(),
                stdin.lock(),
                stdout.lock(),
                args.get_flag("pretty"),
            )?;
            tracing::info!(written = summary.written, skipped = summary.skipped, "done");
        }
        Some(("timestamp", args)) => {
            let value = args
                .get_one::<String>("value")
                .context("missing timestamp value")?;
            let ts = timestamp_literal(&TimestampNormalizer::new(), value);
            if args.get_flag("iso") {
                println!("{} {ts}", ts.as_millis());
            } else {
                println!("{}", ts.as_millis());
            }
        }
        _ => unreachable!("subcommand_required"),
    }

    Ok(())
}
