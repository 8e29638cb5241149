use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use smaem2mqtt::config::Config;
use smaem2mqtt::decode_telegram;
use smaem2mqtt::mqtt::{publish_alive, MqttManager, MqttTopics, ALIVE_INTERVAL};
use smaem2mqtt::SmaEmManager;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Parser, Debug)]
#[command(name = "smaem2mqtt")]
#[command(version)]
#[command(
    about = "Publishes SMA Energy Meter readings to MQTT.",
    long_about = None,
    after_help = "Examples:\n  smaem2mqtt -c /etc/smaem2mqtt\n  smaem2mqtt decode 534d4100000402a0..."
)]
struct Cli {
    /// Directory containing smaem2mqtt.yaml
    #[arg(short = 'c', long, global = true)]
    config_dir: Option<PathBuf>,

    /// Log decoded values and MQTT traffic
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Additionally dump every received datagram
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Append log output to this file instead of stderr
    #[arg(short = 'l', long, global = true)]
    logfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for telegrams and publish them (default)
    Run,
    /// Decode a single telegram given as hex and print it as JSON
    Decode {
        /// Telegram bytes, whitespace is ignored
        hex: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
}

fn init_logging(cli: &Cli) -> Result<()> {
    let default_filter = if cli.debug {
        "trace".to_string()
    } else if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("SMAEM_LOG_LEVEL").unwrap_or("info".to_string())
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::new().default_filter_or(default_filter));

    if let Some(path) = &cli.logfile {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn decode(hex_input: &str, pretty: bool) -> Result<()> {
    let cleaned: String = hex_input.chars().filter(|c| !c.is_whitespace()).collect();
    let data = hex::decode(&cleaned).context("telegram is not valid hex")?;
    let values = decode_telegram(&data).context("failed to decode telegram")?;

    let json = if pretty {
        serde_json::to_string_pretty(&values)?
    } else {
        serde_json::to_string(&values)?
    };
    println!("{json}");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    // we need a channel for the subparts to send metering data to the handler
    let (mut mqtt, tx) = MqttManager::new(&config.mqtt).context("failed to set up the MQTT connection")?;
    let topics = MqttTopics::new(&config.mqtt);

    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    threads.push(tokio::spawn(async move {
        mqtt.start_thread().await;
    }));

    let mut smaem = SmaEmManager::new(tx.clone(), config.smaem.clone(), topics.clone(), config.mqtt.ha_enabled);
    threads.push(tokio::spawn(async move {
        smaem.start_thread().await;
    }));

    /* Periodic alive publishing */
    let alive_sender = tx;
    threads.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(ALIVE_INTERVAL);
        interval.tick().await; // the online status is sent on connect
        loop {
            interval.tick().await;
            publish_alive(&alive_sender, &topics).await;
        }
    }));

    info!("All modules started, now waiting for a signal to exit");
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        if threads.iter().any(|task| task.is_finished()) {
            error!("A module stopped, shutting down");
            for task in threads.iter_mut() {
                task.abort();
            }
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Some(Commands::Decode { hex: ref telegram, pretty }) => decode(telegram, pretty),
        Some(Commands::Run) | None => {
            let config = Config::load(cli.config_dir.as_deref())
                .context("failed to load configuration")?;
            run(config).await
        }
    }
}
