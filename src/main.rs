use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use feedmerge::net::url::parse_wss_url;
use feedmerge::runner::{self, RunMode, RunOptions};

#[derive(Debug, Parser)]
#[command(
    name = "feedmerge",
    about = "Merge N wss connections to one endpoint into a single monotonic NDJSON stream"
)]
struct Cli {
    /// Endpoint, wss://host[:port]/path
    #[arg(
        short = 'u',
        long,
        default_value = "wss://fstream.binance.com/ws/btcusdt@bookTicker"
    )]
    url: String,

    /// Number of simultaneous connections
    #[arg(short = 'n', long, default_value_t = 2)]
    num: usize,

    /// Merged NDJSON output path (truncated on start)
    #[arg(short = 'o', long, default_value = "stream.ndjson")]
    out: String,

    /// Session implementation
    #[arg(short = 'm', long, value_enum, default_value = "async")]
    mode: Mode,

    /// Run duration in seconds; 0 runs until signalled
    #[arg(short = 't', long, default_value_t = 0)]
    seconds: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Async,
    Sync,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(url) = parse_wss_url(&cli.url) else {
        eprintln!("Invalid URL (expected wss://host[:port]/path): {}", cli.url);
        return ExitCode::from(1);
    };

    println!(
        "Connecting to {}:{}{} with N={}, output='{}'",
        url.host,
        url.port,
        url.target,
        cli.num.max(1),
        cli.out
    );

    let opt = RunOptions {
        host: url.host,
        port: url.port,
        target: url.target,
        num_connections: cli.num.max(1),
        out_file: cli.out,
        seconds: cli.seconds,
    };
    let mode = match cli.mode {
        Mode::Async => RunMode::Async,
        Mode::Sync => RunMode::Sync,
    };

    match runner::run(&opt, mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}
