//! # Drover CLI
//!
//! Command-line interface for the drover-proxy system: scrape candidate
//! proxies (`grab`), validate them (`find`), or run the rotating local
//! proxy server (`serve`).
//!
//! ## Examples
//!
//! ```text
//! drover find --types http,socks5 --limit 10 --format json
//! drover serve --host 127.0.0.1 --port 8000 --types http
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use drover_proxy::{
    config::ConfigLoader,
    definitions::{
        enums::{AnonymityLevel, LogLevel, Scheme},
        proxy::Proxy,
        source::default_providers,
    },
    orchestration::broker::{Broker, FindOptions, GrabOptions, ServeOptions},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

#[derive(Parser)]
#[command(
    name = "drover",
    about = "Discovers, validates, and rotates public proxies",
    long_about = "A command-line utility for scraping proxy candidates from public \
                  listing sites, validating their protocols and anonymity, and serving \
                  client traffic through a rotating pool of working proxies.",
    version,
    propagate_version = true
)]
struct Cli {
    /// Command to execute
    #[command(subcommand)]
    command: Commands,

    /// Log level for the application
    #[arg(
        long,
        global = true,
        value_enum,
        ignore_case = true,
        default_value_t = LogLevel::Info
    )]
    log_level: LogLevel,

    /// Directory containing the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,
}

/// Output rendering for emitted proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One `SCHEMES://host:port` line per proxy
    Text,
    /// One JSON document per proxy
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape providers and emit unchecked proxies
    Grab {
        /// Stop after this many proxies (0 = exhaust providers)
        #[arg(long, default_value_t = 0)]
        limit: usize,

        /// Comma-separated ISO country codes to keep
        #[arg(long, value_name = "CODES")]
        countries: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Scrape, validate, and emit working proxies
    Find {
        /// Comma-separated schemes to validate (http, https,
        /// connect:80, connect:25, socks4, socks5)
        #[arg(long, value_name = "SCHEMES", default_value = "http,https")]
        types: String,

        /// Stop after this many validated proxies (0 = exhaust)
        #[arg(long, default_value_t = 0)]
        limit: usize,

        /// Comma-separated ISO country codes to keep
        #[arg(long, value_name = "CODES")]
        countries: Option<String>,

        /// Comma-separated anonymity levels to keep (transparent,
        /// anonymous, high)
        #[arg(long, value_name = "LEVELS")]
        anonymity: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Run the rotating proxy server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind
        #[arg(long, default_value_t = 8000)]
        port: u16,

        /// Comma-separated schemes to validate
        #[arg(long, value_name = "SCHEMES", default_value = "http,https")]
        types: String,

        /// Pool size below which discovery refills
        #[arg(long, default_value_t = 5)]
        min_queue: usize,

        /// Comma-separated ISO country codes to keep
        #[arg(long, value_name = "CODES")]
        countries: Option<String>,
    },
}

fn parse_schemes(input: &str) -> Vec<Scheme> {
    let mut schemes = Vec::new();
    for name in input.split(',').filter(|s| !s.trim().is_empty()) {
        match Scheme::from_str(name.trim()) {
            Ok(scheme) => schemes.push(scheme),
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(2);
            }
        }
    }
    if schemes.is_empty() {
        eprintln!("error: no schemes requested");
        std::process::exit(2);
    }
    schemes
}

fn parse_anonymity(input: Option<String>) -> Vec<AnonymityLevel> {
    let Some(levels) = input else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for name in levels.split(',').filter(|s| !s.trim().is_empty()) {
        match AnonymityLevel::from_str(name.trim()) {
            Ok(level) => out.push(level),
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(2);
            }
        }
    }
    out
}

fn parse_countries(input: Option<String>) -> Vec<String> {
    input
        .map(|codes| {
            codes
                .split(',')
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn emit(proxy: &Proxy, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!("{proxy}"),
        OutputFormat::Json => match proxy.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => log::error!("serialization failed for {proxy}: {err}"),
        },
    }
}

fn progress_bar(limit: usize) -> Option<ProgressBar> {
    if limit == 0 {
        return None;
    }
    let bar = ProgressBar::new(limit as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} {msg}")
            .expect("static template is valid")
            .progress_chars("##-"),
    );
    Some(bar)
}

fn build_broker(config_dir: Option<String>) -> Broker {
    let config = match config_dir {
        Some(dir) => match ConfigLoader::new(&dir) {
            Ok(loader) => loader.get_config().clone(),
            Err(err) => {
                eprintln!("fatal: {err}");
                std::process::exit(1);
            }
        },
        None => drover_proxy::AppConfig::default(),
    };

    match Broker::new(default_providers(), config.to_broker_config()) {
        Ok(broker) => broker,
        Err(err) => {
            eprintln!("fatal: {err}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    pretty_env_logger::formatted_builder()
        .filter_level(cli.log_level.to_filter())
        .init();

    match cli.command {
        Commands::Grab {
            limit,
            countries,
            format,
        } => {
            let mut broker = build_broker(cli.config);
            let mut rx = broker.grab(GrabOptions {
                limit,
                countries: parse_countries(countries),
            });

            let bar = progress_bar(limit);
            let mut count = 0usize;
            while let Some(proxy) = rx.recv().await {
                emit(&proxy, format);
                count += 1;
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
            }
            if let Some(bar) = bar {
                bar.finish_with_message(format!("{count} proxies"));
            }
            broker.stop().await;
        }

        Commands::Find {
            types,
            limit,
            countries,
            anonymity,
            format,
        } => {
            let schemes = parse_schemes(&types);
            let mut broker = build_broker(cli.config);
            let mut rx = match broker
                .find(FindOptions {
                    schemes,
                    limit,
                    countries: parse_countries(countries),
                    anonymity: parse_anonymity(anonymity),
                })
                .await
            {
                Ok(rx) => rx,
                Err(err) => {
                    eprintln!("fatal: {err}");
                    std::process::exit(1);
                }
            };

            let bar = progress_bar(limit);
            let mut count = 0usize;
            while let Some(proxy) = rx.recv().await {
                emit(&proxy, format);
                count += 1;
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
            }
            if let Some(bar) = bar {
                bar.finish_with_message(format!("{count} proxies"));
            }
            broker.stop().await;
        }

        Commands::Serve {
            host,
            port,
            types,
            min_queue,
            countries,
        } => {
            let schemes = parse_schemes(&types);
            let mut broker = build_broker(cli.config);
            let serve = broker
                .serve(ServeOptions {
                    bind: SocketAddr::new(host, port),
                    schemes,
                    min_queue,
                    countries: parse_countries(countries),
                })
                .await;

            match serve {
                Ok((addr, _pool)) => {
                    log::info!("rotating proxy listening on {addr}");
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        log::error!("signal handling failed: {err}");
                    }
                    log::info!("shutting down");
                    broker.stop().await;
                }
                Err(err) => {
                    eprintln!("fatal: {err}");
                    std::process::exit(1);
                }
            }
        }
    }
}
