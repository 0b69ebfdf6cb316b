//! OKX 소스 어댑터.
//!
//! OKX v5 공개 API를 canonical 타입으로 정규화합니다. 심볼은
//! "BTC-USDT-SWAP"처럼 하이픈으로 구분하고, 응답은 항상
//! `{code, msg, data:[...]}` 봉투에 싸여 옵니다. OKX 시세에는 변동
//! 필드가 없으므로 open24h에서 직접 계산해 채웁니다.

use crate::error::{SourceError, SourceResult};
use crate::stream::StreamKey;
use crate::traits::{
    KeepAlive, MarketSource, Protocols, SourceDescriptor, SourceWire, StreamEvent,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_core::{
    DepthUpdate, FundingRate, Kline, MarkPrice, OrderBook, OrderBookLevel, Symbol, Ticker,
    Timeframe,
};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// OKX 어댑터 설정.
#[derive(Debug, Clone)]
pub struct OkxConfig {
    /// REST API 기본 URL
    pub rest_base_url: String,
    /// WebSocket URL
    pub ws_url: String,
    /// HTTP 클라이언트 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://www.okx.com".to_string(),
            ws_url: "wss://ws.okx.com:8443/ws/v5/public".to_string(),
            timeout_secs: 10,
        }
    }
}

// ============================================================================
// REST 응답 타입
// ============================================================================

/// OKX 공통 응답 봉투.
#[derive(Debug, Deserialize)]
struct OkxResponse<T> {
    code: String,
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct OkxTicker {
    inst_id: String,
    last: String,
    open24h: String,
    high24h: String,
    low24h: String,
    vol24h: String,
    vol_ccy24h: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct OkxBook {
    bids: Vec<Vec<String>>,
    asks: Vec<Vec<String>>,
    ts: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct OkxFundingRate {
    inst_id: String,
    funding_rate: String,
    next_funding_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct OkxMarkPrice {
    inst_id: String,
    mark_px: String,
    ts: String,
}

// ============================================================================
// WebSocket 메시지 타입
// ============================================================================

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    arg: WsArg,
    #[serde(default = "Vec::new")]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsArg {
    channel: String,
    inst_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsBookData {
    bids: Vec<Vec<String>>,
    asks: Vec<Vec<String>>,
    ts: String,
    #[serde(default)]
    seq_id: i64,
    #[serde(default = "default_prev_seq_id")]
    prev_seq_id: i64,
}

fn default_prev_seq_id() -> i64 {
    -1
}

// ============================================================================
// 어댑터
// ============================================================================

/// OKX 시장 데이터 소스.
pub struct OkxSource {
    descriptor: SourceDescriptor,
    config: OkxConfig,
    client: Client,
    wire: Arc<OkxWire>,
}

impl OkxSource {
    /// 새 OKX 소스를 생성합니다.
    pub fn new(rank: u32, config: OkxConfig) -> SourceResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SourceError::Transport(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        let wire = Arc::new(OkxWire {
            ws_url: config.ws_url.clone(),
        });

        Ok(Self {
            descriptor: SourceDescriptor {
                name: "okx".to_string(),
                rank,
                protocols: Protocols::both(),
            },
            config,
            client,
            wire,
        })
    }

    /// 내부 Symbol을 OKX 무기한 instId로 변환.
    fn inst_id(symbol: &Symbol) -> String {
        format!("{}-{}-SWAP", symbol.base, symbol.quote)
    }

    /// instId에서 Symbol을 복원.
    fn symbol_from_inst_id(inst_id: &str) -> Symbol {
        let mut parts = inst_id.split('-');
        let base = parts.next().unwrap_or(inst_id);
        let quote = parts.next().unwrap_or("USDT");
        Symbol::new(base, quote)
    }

    fn parse_decimal(s: &str) -> Decimal {
        s.parse().unwrap_or(Decimal::ZERO)
    }

    fn timestamp_from_ms_str(s: &str) -> DateTime<Utc> {
        s.parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    /// last와 open24h에서 빠진 변동 필드를 계산.
    fn derive_change(last: Decimal, open: Decimal) -> (Decimal, Decimal) {
        let change = last - open;
        let percent = if open.is_zero() {
            Decimal::ZERO
        } else {
            change / open * Decimal::from(100)
        };
        (change, percent)
    }

    fn level(l: &[String]) -> OrderBookLevel {
        OrderBookLevel {
            price: l.first().map(|s| Self::parse_decimal(s)).unwrap_or_default(),
            quantity: l.get(1).map(|s| Self::parse_decimal(s)).unwrap_or_default(),
        }
    }

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> SourceResult<Vec<T>> {
        let url = format!("{}{}", self.config.rest_base_url, endpoint);
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let full_url = if query.is_empty() {
            url
        } else {
            format!("{}?{}", url, query.join("&"))
        };

        debug!("GET {}", full_url);
        let response = self.client.get(&full_url).send().await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(SourceError::Api {
                code: status.as_u16() as i32,
                message: body,
            });
        }

        let envelope: OkxResponse<T> = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse OKX response: {} - Body: {}", e, body);
            SourceError::Protocol(e.to_string())
        })?;

        if envelope.code != "0" {
            return Err(Self::map_error_code(&envelope.code, &envelope.msg));
        }
        Ok(envelope.data)
    }

    /// 봉투에서 첫 데이터 항목을 꺼냅니다.
    fn first<T>(mut data: Vec<T>, what: &str) -> SourceResult<T> {
        if data.is_empty() {
            return Err(SourceError::Protocol(format!("empty data for {}", what)));
        }
        Ok(data.remove(0))
    }

    /// OKX 에러 코드를 SourceError로 매핑.
    fn map_error_code(code: &str, msg: &str) -> SourceError {
        match code {
            "50011" | "50013" => SourceError::RateLimited,
            "50111" | "50113" => SourceError::Unauthorized(msg.to_string()),
            _ => SourceError::Api {
                code: code.parse().unwrap_or(-1),
                message: msg.to_string(),
            },
        }
    }
}

#[async_trait]
impl MarketSource for OkxSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn ping(&self) -> SourceResult<()> {
        let _: Vec<serde_json::Value> = self.public_get("/api/v5/public/time", &[]).await?;
        Ok(())
    }

    async fn ticker(&self, symbol: &Symbol) -> SourceResult<Ticker> {
        let data: Vec<OkxTicker> = self
            .public_get("/api/v5/market/ticker", &[("instId", Self::inst_id(symbol))])
            .await?;
        let t = Self::first(data, "ticker")?;

        let last = Self::parse_decimal(&t.last);
        let open = Self::parse_decimal(&t.open24h);
        let (change, percent) = Self::derive_change(last, open);

        Ok(Ticker {
            symbol: symbol.clone(),
            last_price: last,
            price_change: change,
            price_change_percent: percent,
            high: Self::parse_decimal(&t.high24h),
            low: Self::parse_decimal(&t.low24h),
            base_volume: Self::parse_decimal(&t.vol24h),
            quote_volume: Self::parse_decimal(&t.vol_ccy24h),
            timestamp: Self::timestamp_from_ms_str(&t.ts),
        })
    }

    async fn klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: u32,
    ) -> SourceResult<Vec<Kline>> {
        let data: Vec<Vec<String>> = self
            .public_get(
                "/api/v5/market/candles",
                &[
                    ("instId", Self::inst_id(symbol)),
                    ("bar", timeframe.to_okx_bar().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        // OKX는 최신 → 과거 순이므로 뒤집는다
        let mut klines: Vec<Kline> = data
            .iter()
            .filter(|row| row.len() >= 6)
            .map(|row| Kline {
                symbol: symbol.clone(),
                timeframe,
                open_time: Self::timestamp_from_ms_str(&row[0]),
                open: Self::parse_decimal(&row[1]),
                high: Self::parse_decimal(&row[2]),
                low: Self::parse_decimal(&row[3]),
                close: Self::parse_decimal(&row[4]),
                volume: Self::parse_decimal(&row[5]),
            })
            .collect();
        klines.reverse();
        Ok(klines)
    }

    async fn depth(&self, symbol: &Symbol, limit: u32) -> SourceResult<OrderBook> {
        let data: Vec<OkxBook> = self
            .public_get(
                "/api/v5/market/books",
                &[
                    ("instId", Self::inst_id(symbol)),
                    ("sz", limit.to_string()),
                ],
            )
            .await?;
        let book = Self::first(data, "depth")?;

        // REST 스냅샷에는 시퀀스 번호가 없어 타임스탬프(ms)를 사용
        let update_id = book.ts.parse::<u64>().unwrap_or(0);

        Ok(OrderBook {
            symbol: symbol.clone(),
            bids: book.bids.iter().map(|l| Self::level(l)).collect(),
            asks: book.asks.iter().map(|l| Self::level(l)).collect(),
            update_id,
            timestamp: Self::timestamp_from_ms_str(&book.ts),
        })
    }

    async fn funding_rate(&self, symbol: &Symbol) -> SourceResult<FundingRate> {
        let data: Vec<OkxFundingRate> = self
            .public_get(
                "/api/v5/public/funding-rate",
                &[("instId", Self::inst_id(symbol))],
            )
            .await?;
        let f = Self::first(data, "funding rate")?;

        Ok(FundingRate {
            symbol: symbol.clone(),
            rate: Self::parse_decimal(&f.funding_rate),
            next_funding_time: f
                .next_funding_time
                .parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis),
            timestamp: Utc::now(),
        })
    }

    async fn mark_price(&self, symbol: &Symbol) -> SourceResult<MarkPrice> {
        let data: Vec<OkxMarkPrice> = self
            .public_get(
                "/api/v5/public/mark-price",
                &[
                    ("instType", "SWAP".to_string()),
                    ("instId", Self::inst_id(symbol)),
                ],
            )
            .await?;
        let m = Self::first(data, "mark price")?;

        Ok(MarkPrice {
            symbol: symbol.clone(),
            mark_price: Self::parse_decimal(&m.mark_px),
            index_price: None,
            timestamp: Self::timestamp_from_ms_str(&m.ts),
        })
    }

    fn wire(&self) -> Option<Arc<dyn SourceWire>> {
        Some(self.wire.clone())
    }
}

// ============================================================================
// WebSocket wire
// ============================================================================

/// OKX WebSocket wire 어댑터.
pub struct OkxWire {
    ws_url: String,
}

impl OkxWire {
    fn channel_for(key: &StreamKey) -> String {
        match &key.channel {
            crate::stream::StreamChannel::Ticker => "tickers".to_string(),
            crate::stream::StreamChannel::Kline(tf) => format!("candle{}", tf.to_okx_bar()),
            crate::stream::StreamChannel::Depth { .. } => "books".to_string(),
        }
    }
}

impl SourceWire for OkxWire {
    fn name(&self) -> &str {
        "okx"
    }

    fn ws_url(&self) -> String {
        self.ws_url.clone()
    }

    fn subscribe_frames(&self, keys: &[StreamKey]) -> Vec<String> {
        if keys.is_empty() {
            return Vec::new();
        }
        let args: Vec<serde_json::Value> = keys
            .iter()
            .map(|key| {
                serde_json::json!({
                    "channel": Self::channel_for(key),
                    "instId": OkxSource::inst_id(&key.symbol),
                })
            })
            .collect();
        vec![serde_json::json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn keepalive(&self) -> KeepAlive {
        // OKX는 30초 무활동 시 연결을 끊는다
        KeepAlive::Text {
            payload: "ping".to_string(),
            interval: Duration::from_secs(25),
        }
    }

    fn parse_message(&self, text: &str) -> Option<(StreamKey, StreamEvent)> {
        // keepalive 응답
        if text == "pong" {
            return None;
        }

        let envelope: WsEnvelope = serde_json::from_str(text).ok()?;
        let symbol = OkxSource::symbol_from_inst_id(&envelope.arg.inst_id);
        let first = envelope.data.first()?;

        if envelope.arg.channel == "tickers" {
            let t: OkxTicker = serde_json::from_value(first.clone()).ok()?;
            let last = OkxSource::parse_decimal(&t.last);
            let open = OkxSource::parse_decimal(&t.open24h);
            let (change, percent) = OkxSource::derive_change(last, open);

            let event = StreamEvent::Ticker(Ticker {
                symbol: symbol.clone(),
                last_price: last,
                price_change: change,
                price_change_percent: percent,
                high: OkxSource::parse_decimal(&t.high24h),
                low: OkxSource::parse_decimal(&t.low24h),
                base_volume: OkxSource::parse_decimal(&t.vol24h),
                quote_volume: OkxSource::parse_decimal(&t.vol_ccy24h),
                timestamp: OkxSource::timestamp_from_ms_str(&t.ts),
            });
            return Some((StreamKey::ticker(symbol), event));
        }

        if let Some(bar) = envelope.arg.channel.strip_prefix("candle") {
            let timeframe = Timeframe::from_okx_bar(bar)?;
            let row: Vec<String> = serde_json::from_value(first.clone()).ok()?;
            if row.len() < 6 {
                return None;
            }
            let event = StreamEvent::Kline(Kline {
                symbol: symbol.clone(),
                timeframe,
                open_time: OkxSource::timestamp_from_ms_str(&row[0]),
                open: OkxSource::parse_decimal(&row[1]),
                high: OkxSource::parse_decimal(&row[2]),
                low: OkxSource::parse_decimal(&row[3]),
                close: OkxSource::parse_decimal(&row[4]),
                volume: OkxSource::parse_decimal(&row[5]),
            });
            return Some((StreamKey::kline(symbol, timeframe), event));
        }

        if envelope.arg.channel == "books" {
            let book: WsBookData = serde_json::from_value(first.clone()).ok()?;
            let event = StreamEvent::Depth(DepthUpdate {
                symbol: symbol.clone(),
                first_update_id: (book.prev_seq_id + 1).max(0) as u64,
                final_update_id: book.seq_id.max(0) as u64,
                bids: book.bids.iter().map(|l| OkxSource::level(l)).collect(),
                asks: book.asks.iter().map(|l| OkxSource::level(l)).collect(),
                timestamp: OkxSource::timestamp_from_ms_str(&book.ts),
            });
            return Some((StreamKey::depth(symbol, None), event));
        }

        None
    }
}
