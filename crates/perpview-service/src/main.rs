//! perpview CLI: resolve symbols and tail live candle or depth feeds.

use anyhow::Result;
use clap::{Parser, Subcommand};
use perpview_core::{Candle, DepthLadder, Resolution, Symbol};
use perpview_feed::{FeedFold, FeedStream, StreamEvent};
use perpview_service::{write_metrics, AppConfig, MarketDataService, TimeRange};
use std::time::Duration;
use tracing::{info, warn};

/// perpview market data client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PERPVIEW_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Write a Prometheus metrics snapshot on exit (`-` for stdout)
    #[arg(long, global = true, value_name = "PATH")]
    metrics_out: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the market id for a symbol
    Resolve { symbol: Symbol },
    /// Load candle history and follow the live bar
    Candles {
        symbol: Symbol,
        #[arg(short, long, default_value = "1m")]
        resolution: Resolution,
        #[arg(short, long, default_value_t = 60)]
        lookback_mins: u64,
    },
    /// Follow the order book ladder
    Depth {
        symbol: Symbol,
        #[arg(short, long, default_value_t = 10)]
        depth: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before any WS connection.
    perpview_ws::init_crypto();

    let args = Args::parse();
    perpview_telemetry::init_logging()?;
    info!("Starting perpview v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref())?;
    info!(ws_url = %config.ws.url, info_url = %config.registry.info_url, "Configuration loaded");

    let service = MarketDataService::from_config(&config)?;

    match args.command {
        Command::Resolve { symbol } => {
            let market_id = service.get_market_id(&symbol).await?;
            info!(%symbol, market = %market_id, "Resolved");
            println!("{market_id}");
        }
        Command::Candles {
            symbol,
            resolution,
            lookback_mins,
        } => {
            let range = TimeRange::last(Duration::from_secs(lookback_mins * 60));
            let feed = service.get_candles(&symbol, resolution, range).await?;
            for bar in &feed.history {
                info!(
                    start = ?bar.start_time(),
                    open = bar.open,
                    high = bar.high,
                    low = bar.low,
                    close = bar.close,
                    volume = bar.volume,
                    "History bar"
                );
            }
            follow(feed.stream, |bar: &Candle| {
                info!(
                    start = ?bar.start_time(),
                    open = bar.open,
                    high = bar.high,
                    low = bar.low,
                    close = bar.close,
                    "Live bar"
                );
            })
            .await;
        }
        Command::Depth { symbol, depth } => {
            let stream = service.get_depth(&symbol, depth).await?;
            follow(stream, |ladder: &DepthLadder| {
                info!(
                    best_bid = ?ladder.best_bid,
                    best_ask = ?ladder.best_ask,
                    spread = ?ladder.spread(),
                    bid_levels = ladder.bids.len(),
                    ask_levels = ladder.asks.len(),
                    "Ladder"
                );
            })
            .await;
        }
    }

    service.multiplexer().connection().shutdown();
    if let Some(target) = args.metrics_out.as_deref() {
        write_metrics(target)?;
        info!(target, "Metrics snapshot written");
    }
    Ok(())
}

/// Log stream events until the stream ends or Ctrl-C.
async fn follow<F, L>(mut stream: FeedStream<F>, mut log_update: L)
where
    F: FeedFold,
    L: FnMut(&F::Output),
{
    loop {
        tokio::select! {
            event = stream.next_event() => match event {
                Some(StreamEvent::Update(update)) => log_update(&update),
                Some(StreamEvent::Status(status)) => info!(%status, "Feed status"),
                None => {
                    warn!("Feed ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing feed");
                stream.cancel();
                break;
            }
        }
    }
}
