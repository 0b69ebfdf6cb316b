//! 시장 데이터 피드 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 페일오버 경로로 시세 한 번 조회
//! feed ticker -s BTC/USDT
//!
//! # 스트림 구독 (상태 변경 포함)
//! feed watch -k btcusdt@ticker
//!
//! # 소스 헬스 확인
//! feed health
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use feed_core::{init_logging, FeedConfig, FeedResponse, Symbol};
use feed_data::{CachePolicy, FreshnessCache, JsonFileMirror};
use feed_exchange::{
    build_sources, AccountClient, BinanceAccount, FailoverRouter, HealthConfig, HealthRegistry,
    StreamEvent, StreamKey, StreamManager, TungsteniteConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "feed")]
#[command(about = "Resilient multi-exchange market data feed", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 페일오버 경로로 시세 조회
    Ticker {
        /// 심볼 (예: BTC/USDT)
        #[arg(short, long)]
        symbol: String,
    },

    /// 스트림 구독
    Watch {
        /// 스트림 키 (예: btcusdt@ticker, btcusdt@kline_1m, btcusdt@depth@100ms)
        #[arg(short, long)]
        key: String,
    },

    /// 소스 헬스 스냅샷 출력
    Health,

    /// 계좌 스냅샷 조회 (BINANCE_API_KEY / BINANCE_API_SECRET 필요)
    Account,
}

async fn build_router(config: &FeedConfig) -> anyhow::Result<Arc<FailoverRouter>> {
    let sources = build_sources(&config.sources).context("소스 어댑터 생성 실패")?;

    let health = Arc::new(HealthRegistry::new(
        sources.iter().map(|s| s.name().to_string()),
        HealthConfig {
            unhealthy_threshold: config.failover.unhealthy_threshold,
            cooldown: Duration::from_secs(config.failover.cooldown_secs),
            ..Default::default()
        },
    ));

    let mut cache = FreshnessCache::new(CachePolicy::new(config.cache.clone()));
    if let Some(path) = &config.cache.mirror_path {
        cache = cache.with_mirror(Arc::new(JsonFileMirror::new(path)));
    }
    let cache = Arc::new(cache);
    // 지난 세션의 마지막 성공 값 복원
    cache.restore().await;

    Ok(Arc::new(FailoverRouter::new(
        sources,
        health,
        cache,
        &config.failover,
    )))
}

async fn run_ticker(config: &FeedConfig, symbol: &str) -> anyhow::Result<()> {
    let symbol = Symbol::from_string(symbol)
        .with_context(|| format!("잘못된 심볼: {} (예: BTC/USDT)", symbol))?;

    let router = build_router(config).await?;
    match router.ticker(&symbol).await {
        FeedResponse::Data(sourced) => {
            let meta = &sourced.meta;
            let badge = if meta.is_stale {
                format!("{} {:.0}s ago, confidence {:.2}",
                    meta.reality,
                    meta.age_ms as f64 / 1000.0,
                    meta.confidence)
            } else {
                format!("{}, {}", meta.reality, meta.source)
            };
            println!(
                "{}  last={}  change={} ({}%)  high={}  low={}  [{}]",
                sourced.data.symbol,
                sourced.data.last_price,
                sourced.data.price_change,
                sourced.data.price_change_percent,
                sourced.data.high,
                sourced.data.low,
                badge,
            );
        }
        FeedResponse::Unavailable(gone) => {
            // 0이나 빈 값으로 뭉개지 않고 명시적으로 표시한다
            println!("{}", gone);
        }
    }
    Ok(())
}

async fn run_watch(config: &FeedConfig, key: &str) -> anyhow::Result<()> {
    let key: StreamKey = key.parse().map_err(|e| anyhow::anyhow!("{}", e))?;

    let sources = build_sources(&config.sources).context("소스 어댑터 생성 실패")?;
    let wires = sources
        .iter()
        .filter_map(|source| source.wire())
        .collect::<Vec<_>>();

    let manager = StreamManager::new(
        wires,
        Arc::new(TungsteniteConnector::new()),
        config.stream.clone(),
    );

    let _status = manager.on_status_change(|status| {
        println!("-- status: {}", status);
    });

    let _guard = manager.subscribe(
        key.clone(),
        Arc::new(|event| match event {
            StreamEvent::Ticker(ticker) => {
                println!(
                    "{}  last={}  change={}%",
                    ticker.symbol, ticker.last_price, ticker.price_change_percent
                );
            }
            StreamEvent::Kline(kline) => {
                println!(
                    "{} {}  o={} h={} l={} c={} v={}",
                    kline.symbol, kline.timeframe, kline.open, kline.high, kline.low,
                    kline.close, kline.volume
                );
            }
            StreamEvent::Depth(update) => {
                println!(
                    "{}  depth update seq {}..{} ({} bids, {} asks)",
                    update.symbol,
                    update.first_update_id,
                    update.final_update_id,
                    update.bids.len(),
                    update.asks.len()
                );
            }
        }),
    );

    info!(key = %key, "스트림 구독 시작, Ctrl-C로 종료");
    tokio::signal::ctrl_c().await?;
    manager.shutdown();
    Ok(())
}

async fn run_health(config: &FeedConfig) -> anyhow::Result<()> {
    let router = build_router(config).await?;
    router.health_tick().await;

    println!(
        "{:<10} {:<10} {:>8} {:>12} {:>10} {:>10}",
        "source", "healthy", "errors", "latency(ms)", "ok", "fail"
    );
    for snapshot in router.health().snapshot() {
        println!(
            "{:<10} {:<10} {:>8} {:>12} {:>10} {:>10}",
            snapshot.source,
            if snapshot.healthy { "yes" } else { "NO" },
            snapshot.consecutive_errors,
            snapshot
                .avg_latency_ms
                .map(|ms| format!("{:.1}", ms))
                .unwrap_or_else(|| "-".to_string()),
            snapshot.total_successes,
            snapshot.total_failures,
        );
    }
    if let Some(preferred) = router.preferred_source() {
        println!("preferred: {}", preferred);
    }
    Ok(())
}

async fn run_account(config: &FeedConfig) -> anyhow::Result<()> {
    let venue = BinanceAccount::from_env()
        .context("BINANCE_API_KEY / BINANCE_API_SECRET 환경 변수가 필요합니다")?;
    let client = AccountClient::new(
        Arc::new(venue),
        Duration::from_secs(config.failover.account_snapshot_secs),
    );

    // 계좌는 페일오버 없음 - 실패는 그대로 에러로 끝난다
    let snapshot = client.account().await?;
    println!("venue: {} [{}]", snapshot.data.venue, snapshot.meta.reality);
    for balance in &snapshot.data.balances {
        println!(
            "{:<8} wallet={:<16} available={}",
            balance.asset, balance.wallet, balance.available
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = FeedConfig::from_env().unwrap_or_default();
    init_logging(&config.logging.level, config.logging.format.parse().unwrap_or_default())
        .map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Ticker { symbol } => run_ticker(&config, &symbol).await,
        Commands::Watch { key } => run_watch(&config, &key).await,
        Commands::Health => run_health(&config).await,
        Commands::Account => run_account(&config).await,
    }
}
