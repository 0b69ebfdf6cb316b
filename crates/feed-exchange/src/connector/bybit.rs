//! Bybit 소스 어댑터.
//!
//! Bybit v5 공개 API(linear 카테고리)를 canonical 타입으로 정규화합니다.
//! 응답 봉투는 `{retCode, retMsg, result}`, 변동률은 "0.0354" 같은
//! 소수(fraction)로 내려오므로 %로 환산합니다. 펀딩/마크 가격은 별도
//! 엔드포인트 없이 tickers 응답에 포함됩니다.

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

/// Bybit 어댑터 설정.
#[derive(Debug, Clone)]
pub struct BybitConfig {
    /// REST API 기본 URL
    pub rest_base_url: String,
    /// WebSocket URL
    pub ws_url: String,
    /// HTTP 클라이언트 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://api.bybit.com".to_string(),
            ws_url: "wss://stream.bybit.com/v5/public/linear".to_string(),
            timeout_secs: 10,
        }
    }
}

// ============================================================================
// REST 응답 타입
// ============================================================================

/// Bybit 공통 응답 봉투.
///
/// 에러 응답의 result는 빈 객체일 수 있어, retCode 확인 후에 본문을
/// 역직렬화합니다.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitResponse {
    ret_code: i32,
    ret_msg: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BybitList<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct BybitTicker {
    symbol: String,
    last_price: String,
    prev_price24h: String,
    price24h_pcnt: String,
    high_price24h: String,
    low_price24h: String,
    volume24h: String,
    turnover24h: String,
    #[serde(default)]
    mark_price: String,
    #[serde(default)]
    index_price: String,
    #[serde(default)]
    funding_rate: String,
    #[serde(default)]
    next_funding_time: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct BybitOrderbook {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
    #[serde(rename = "ts")]
    ts: i64,
    #[serde(rename = "u")]
    update_id: u64,
}

// ============================================================================
// WebSocket 메시지 타입
// ============================================================================

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    topic: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    ts: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsTickerData {
    #[serde(default)]
    last_price: String,
    #[serde(default)]
    prev_price24h: String,
    #[serde(default)]
    price24h_pcnt: String,
    #[serde(default)]
    high_price24h: String,
    #[serde(default)]
    low_price24h: String,
    #[serde(default)]
    volume24h: String,
    #[serde(default)]
    turnover24h: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct WsKlineData {
    start: i64,
    interval: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    confirm: bool,
}

#[derive(Debug, Deserialize)]
struct WsBookData {
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
    #[serde(rename = "u")]
    update_id: u64,
}

// ============================================================================
// 어댑터
// ============================================================================

/// Bybit 시장 데이터 소스.
pub struct BybitSource {
    descriptor: SourceDescriptor,
    config: BybitConfig,
    client: Client,
    wire: Arc<BybitWire>,
}

impl BybitSource {
    /// 새 Bybit 소스를 생성합니다.
    pub fn new(rank: u32, config: BybitConfig) -> SourceResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SourceError::Transport(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        let wire = Arc::new(BybitWire {
            ws_url: config.ws_url.clone(),
        });

        Ok(Self {
            descriptor: SourceDescriptor {
                name: "bybit".to_string(),
                rank,
                protocols: Protocols::both(),
            },
            config,
            client,
            wire,
        })
    }

    /// 내부 Symbol을 Bybit 심볼 형식으로 변환.
    fn format_symbol(symbol: &Symbol) -> String {
        format!("{}{}", symbol.base, symbol.quote)
    }

    fn parse_decimal(s: &str) -> Decimal {
        s.parse().unwrap_or(Decimal::ZERO)
    }

    fn timestamp_from_ms(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    /// "0.0354" 같은 fraction 변동률을 %로 환산.
    fn fraction_to_percent(s: &str) -> Decimal {
        Self::parse_decimal(s) * Decimal::from(100)
    }

    async fn public_get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> SourceResult<T> {
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

        let envelope: BybitResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse Bybit response: {} - Body: {}", e, body);
            SourceError::Protocol(e.to_string())
        })?;

        if envelope.ret_code != 0 {
            return Err(Self::map_error_code(envelope.ret_code, &envelope.ret_msg));
        }
        serde_json::from_value(envelope.result)
            .map_err(|e| SourceError::Protocol(format!("bad result payload: {}", e)))
    }

    async fn fetch_ticker_raw(&self, symbol: &Symbol) -> SourceResult<BybitTicker> {
        let result: BybitList<BybitTicker> = self
            .public_get(
                "/v5/market/tickers",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", Self::format_symbol(symbol)),
                ],
            )
            .await?;

        result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Protocol("empty ticker list".to_string()))
    }

    /// Bybit 에러 코드를 SourceError로 매핑.
    fn map_error_code(code: i32, msg: &str) -> SourceError {
        match code {
            10006 | 10018 => SourceError::RateLimited,
            10003 | 10004 | 10005 => SourceError::Unauthorized(msg.to_string()),
            _ => SourceError::Api {
                code,
                message: msg.to_string(),
            },
        }
    }
}

#[async_trait]
impl MarketSource for BybitSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn ping(&self) -> SourceResult<()> {
        let _: serde_json::Value = self.public_get("/v5/market/time", &[]).await?;
        Ok(())
    }

    async fn ticker(&self, symbol: &Symbol) -> SourceResult<Ticker> {
        let t = self.fetch_ticker_raw(symbol).await?;

        let last = Self::parse_decimal(&t.last_price);
        let prev = Self::parse_decimal(&t.prev_price24h);

        Ok(Ticker {
            symbol: symbol.clone(),
            last_price: last,
            price_change: last - prev,
            price_change_percent: Self::fraction_to_percent(&t.price24h_pcnt),
            high: Self::parse_decimal(&t.high_price24h),
            low: Self::parse_decimal(&t.low_price24h),
            base_volume: Self::parse_decimal(&t.volume24h),
            quote_volume: Self::parse_decimal(&t.turnover24h),
            timestamp: Utc::now(),
        })
    }

    async fn klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: u32,
    ) -> SourceResult<Vec<Kline>> {
        let result: BybitList<Vec<String>> = self
            .public_get(
                "/v5/market/kline",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", Self::format_symbol(symbol)),
                    ("interval", timeframe.to_bybit_interval().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        // Bybit은 최신 → 과거 순이므로 뒤집는다
        let mut klines: Vec<Kline> = result
            .list
            .iter()
            .filter(|row| row.len() >= 6)
            .map(|row| Kline {
                symbol: symbol.clone(),
                timeframe,
                open_time: Self::timestamp_from_ms(row[0].parse().unwrap_or(0)),
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
        let book: BybitOrderbook = self
            .public_get(
                "/v5/market/orderbook",
                &[
                    ("category", "linear".to_string()),
                    ("symbol", Self::format_symbol(symbol)),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let level = |[price, qty]: &[String; 2]| OrderBookLevel {
            price: Self::parse_decimal(price),
            quantity: Self::parse_decimal(qty),
        };

        Ok(OrderBook {
            symbol: symbol.clone(),
            bids: book.bids.iter().map(level).collect(),
            asks: book.asks.iter().map(level).collect(),
            update_id: book.update_id,
            timestamp: Self::timestamp_from_ms(book.ts),
        })
    }

    async fn funding_rate(&self, symbol: &Symbol) -> SourceResult<FundingRate> {
        let t = self.fetch_ticker_raw(symbol).await?;

        Ok(FundingRate {
            symbol: symbol.clone(),
            rate: Self::parse_decimal(&t.funding_rate),
            next_funding_time: t
                .next_funding_time
                .parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis),
            timestamp: Utc::now(),
        })
    }

    async fn mark_price(&self, symbol: &Symbol) -> SourceResult<MarkPrice> {
        let t = self.fetch_ticker_raw(symbol).await?;
        let index = Self::parse_decimal(&t.index_price);

        Ok(MarkPrice {
            symbol: symbol.clone(),
            mark_price: Self::parse_decimal(&t.mark_price),
            index_price: if index.is_zero() { None } else { Some(index) },
            timestamp: Utc::now(),
        })
    }

    fn wire(&self) -> Option<Arc<dyn SourceWire>> {
        Some(self.wire.clone())
    }
}

// ============================================================================
// WebSocket wire
// ============================================================================

/// Bybit WebSocket wire 어댑터.
pub struct BybitWire {
    ws_url: String,
}

impl BybitWire {
    fn topic_for(key: &StreamKey) -> String {
        let symbol = BybitSource::format_symbol(&key.symbol);
        match &key.channel {
            crate::stream::StreamChannel::Ticker => format!("tickers.{}", symbol),
            crate::stream::StreamChannel::Kline(tf) => {
                format!("kline.{}.{}", tf.to_bybit_interval(), symbol)
            }
            crate::stream::StreamChannel::Depth { .. } => format!("orderbook.50.{}", symbol),
        }
    }
}

impl SourceWire for BybitWire {
    fn name(&self) -> &str {
        "bybit"
    }

    fn ws_url(&self) -> String {
        self.ws_url.clone()
    }

    fn subscribe_frames(&self, keys: &[StreamKey]) -> Vec<String> {
        if keys.is_empty() {
            return Vec::new();
        }
        let args: Vec<String> = keys.iter().map(Self::topic_for).collect();
        vec![serde_json::json!({ "op": "subscribe", "args": args }).to_string()]
    }

    fn keepalive(&self) -> KeepAlive {
        // Bybit 권장: 20초마다 ping
        KeepAlive::Text {
            payload: serde_json::json!({ "op": "ping" }).to_string(),
            interval: Duration::from_secs(20),
        }
    }

    fn parse_message(&self, text: &str) -> Option<(StreamKey, StreamEvent)> {
        let envelope: WsEnvelope = serde_json::from_str(text).ok()?;

        let mut topic_parts = envelope.topic.split('.');
        let kind = topic_parts.next()?;

        match kind {
            "tickers" => {
                let symbol = Symbol::from_compact(topic_parts.next()?);
                let t: WsTickerData = serde_json::from_value(envelope.data).ok()?;
                if t.last_price.is_empty() {
                    // delta 프레임은 바뀐 필드만 담는다 - 가격 없는 프레임은 스킵
                    return None;
                }

                let last = BybitSource::parse_decimal(&t.last_price);
                let prev = BybitSource::parse_decimal(&t.prev_price24h);
                let event = StreamEvent::Ticker(Ticker {
                    symbol: symbol.clone(),
                    last_price: last,
                    price_change: last - prev,
                    price_change_percent: BybitSource::fraction_to_percent(&t.price24h_pcnt),
                    high: BybitSource::parse_decimal(&t.high_price24h),
                    low: BybitSource::parse_decimal(&t.low_price24h),
                    base_volume: BybitSource::parse_decimal(&t.volume24h),
                    quote_volume: BybitSource::parse_decimal(&t.turnover24h),
                    timestamp: BybitSource::timestamp_from_ms(envelope.ts),
                });
                Some((StreamKey::ticker(symbol), event))
            }
            "kline" => {
                let interval = topic_parts.next()?;
                let symbol = Symbol::from_compact(topic_parts.next()?);
                let timeframe = Timeframe::from_bybit_interval(interval)?;

                let rows: Vec<WsKlineData> = serde_json::from_value(envelope.data).ok()?;
                let k = rows.into_iter().next()?;
                let event = StreamEvent::Kline(Kline {
                    symbol: symbol.clone(),
                    timeframe,
                    open_time: BybitSource::timestamp_from_ms(k.start),
                    open: BybitSource::parse_decimal(&k.open),
                    high: BybitSource::parse_decimal(&k.high),
                    low: BybitSource::parse_decimal(&k.low),
                    close: BybitSource::parse_decimal(&k.close),
                    volume: BybitSource::parse_decimal(&k.volume),
                });
                Some((StreamKey::kline(symbol, timeframe), event))
            }
            "orderbook" => {
                let _depth_level = topic_parts.next()?;
                let symbol = Symbol::from_compact(topic_parts.next()?);

                let book: WsBookData = serde_json::from_value(envelope.data).ok()?;
                let level = |l: &[String; 2]| OrderBookLevel {
                    price: BybitSource::parse_decimal(&l[0]),
                    quantity: BybitSource::parse_decimal(&l[1]),
                };
                let event = StreamEvent::Depth(DepthUpdate {
                    symbol: symbol.clone(),
                    first_update_id: book.update_id,
                    final_update_id: book.update_id,
                    bids: book.bids.iter().map(level).collect(),
                    asks: book.asks.iter().map(level).collect(),
                    timestamp: BybitSource::timestamp_from_ms(envelope.ts),
                });
                Some((StreamKey::depth(symbol, None), event))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wire() -> BybitWire {
        BybitWire {
            ws_url: "wss://stream.bybit.com/v5/public/linear".to_string(),
        }
    }

    #[test]
    fn test_topic_names() {
        let ticker: StreamKey = "btcusdt@ticker".parse().unwrap();
        let kline: StreamKey = "btcusdt@kline_1h".parse().unwrap();
        let depth: StreamKey = "btcusdt@depth@100ms".parse().unwrap();

        assert_eq!(BybitWire::topic_for(&ticker), "tickers.BTCUSDT");
        assert_eq!(BybitWire::topic_for(&kline), "kline.60.BTCUSDT");
        assert_eq!(BybitWire::topic_for(&depth), "orderbook.50.BTCUSDT");
    }

    #[test]
    fn test_fraction_to_percent() {
        assert_eq!(BybitSource::fraction_to_percent("0.0354"), dec!(3.5400));
        assert_eq!(BybitSource::fraction_to_percent("-0.015"), dec!(-1.500));
    }

    #[test]
    fn test_parse_ws_ticker() {
        let text = r#"{"topic":"tickers.BTCUSDT","type":"snapshot","ts":1700000000000,"data":{"symbol":"BTCUSDT","lastPrice":"50500","prevPrice24h":"50000","price24hPcnt":"0.01","highPrice24h":"51000","lowPrice24h":"49000","volume24h":"12345","turnover24h":"620000000"}}"#;

        let (key, event) = wire().parse_message(text).unwrap();
        assert_eq!(key, StreamKey::ticker(Symbol::new("BTC", "USDT")));

        let StreamEvent::Ticker(ticker) = event else {
            panic!("expected ticker event");
        };
        assert_eq!(ticker.last_price, dec!(50500));
        assert_eq!(ticker.price_change, dec!(500));
        assert_eq!(ticker.price_change_percent, dec!(1.00));
    }

    #[test]
    fn test_ticker_delta_without_price_dropped() {
        // delta 프레임에 lastPrice가 없으면 스킵
        let text = r#"{"topic":"tickers.BTCUSDT","type":"delta","ts":1700000000000,"data":{"symbol":"BTCUSDT","openInterest":"1234"}}"#;
        assert!(wire().parse_message(text).is_none());
    }

    #[test]
    fn test_parse_ws_kline() {
        let text = r#"{"topic":"kline.60.ETHUSDT","ts":1700000000000,"data":[{"start":1700000000000,"end":1700003599999,"interval":"60","open":"2000","high":"2010","low":"1995","close":"2005","volume":"321","turnover":"644205","confirm":false,"timestamp":1700000012345}]}"#;

        let (key, event) = wire().parse_message(text).unwrap();
        assert_eq!(
            key,
            StreamKey::kline(Symbol::new("ETH", "USDT"), Timeframe::H1)
        );

        let StreamEvent::Kline(kline) = event else {
            panic!("expected kline event");
        };
        assert_eq!(kline.open, dec!(2000));
    }

    #[test]
    fn test_parse_ws_orderbook() {
        let text = r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":1700000000000,"data":{"s":"BTCUSDT","b":[["50000","1.5"]],"a":[["50001","2"]],"u":777,"seq":123456}}"#;

        let (key, event) = wire().parse_message(text).unwrap();
        assert_eq!(key, StreamKey::depth(Symbol::new("BTC", "USDT"), None));

        let StreamEvent::Depth(update) = event else {
            panic!("expected depth event");
        };
        assert_eq!(update.final_update_id, 777);
    }

    #[test]
    fn test_pong_and_ack_dropped() {
        assert!(wire()
            .parse_message(r#"{"success":true,"ret_msg":"pong","op":"ping"}"#)
            .is_none());
        assert!(wire()
            .parse_message(r#"{"success":true,"op":"subscribe","conn_id":"abc"}"#)
            .is_none());
    }

    #[tokio::test]
    async fn test_rest_ticker_unit_translation() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/v5/market/tickers?category=linear&symbol=BTCUSDT",
            )
            .with_status(200)
            .with_body(
                r#"{"retCode":0,"retMsg":"OK","result":{"category":"linear","list":[{"symbol":"BTCUSDT","lastPrice":"50500","prevPrice24h":"50000","price24hPcnt":"0.01","highPrice24h":"51000","lowPrice24h":"49000","volume24h":"12345","turnover24h":"620000000","markPrice":"50498.5","indexPrice":"50499","fundingRate":"0.0001","nextFundingTime":"1700028800000"}]},"time":1700000000000}"#,
            )
            .create_async()
            .await;

        let source = BybitSource::new(
            2,
            BybitConfig {
                rest_base_url: server.url(),
                ..Default::default()
            },
        )
        .unwrap();

        let symbol = Symbol::new("BTC", "USDT");
        let ticker = source.ticker(&symbol).await.unwrap();
        assert_eq!(ticker.price_change, dec!(500));
        assert_eq!(ticker.price_change_percent, dec!(1.00));
    }

    #[tokio::test]
    async fn test_rest_error_envelope() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/v5/market/tickers?category=linear&symbol=BTCUSDT",
            )
            .with_status(200)
            .with_body(r#"{"retCode":10006,"retMsg":"Too many visits!","result":{}}"#)
            .create_async()
            .await;

        let source = BybitSource::new(
            2,
            BybitConfig {
                rest_base_url: server.url(),
                ..Default::default()
            },
        )
        .unwrap();

        let err = source
            .ticker(&Symbol::new("BTC", "USDT"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::RateLimited));
    }
}
