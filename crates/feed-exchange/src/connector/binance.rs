//! Binance 소스 어댑터.
//!
//! Binance USDⓈ-M 선물 REST API와 WebSocket 스트림을 canonical 타입으로
//! 정규화합니다. 심볼은 "BTCUSDT"처럼 붙여 쓰고, 스트림 이름은 이 피드의
//! 스트림 키 표기와 동일합니다.

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
use tracing::{debug, error};

// ============================================================================
// 설정
// ============================================================================

/// Binance 어댑터 설정.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    /// REST API 기본 URL
    pub rest_base_url: String,
    /// WebSocket URL
    pub ws_url: String,
    /// HTTP 클라이언트 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://fapi.binance.com".to_string(),
            ws_url: "wss://fstream.binance.com/ws".to_string(),
            timeout_secs: 10,
        }
    }
}

// ============================================================================
// REST 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct BinanceTicker24h {
    symbol: String,
    price_change: String,
    price_change_percent: String,
    last_price: String,
    high_price: String,
    low_price: String,
    volume: String,
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct BinanceKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    i64,    // 8: Number of trades
    String, // 9: Taker buy base asset volume
    String, // 10: Taker buy quote asset volume
    String, // 11: Ignore
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceDepth {
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct BinancePremiumIndex {
    symbol: String,
    mark_price: String,
    index_price: String,
    last_funding_rate: String,
    next_funding_time: i64,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct BinanceApiError {
    code: i32,
    msg: String,
}

// ============================================================================
// WebSocket 메시지 타입
// ============================================================================

#[derive(Debug, Deserialize)]
struct WsTicker {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "p")]
    price_change: String,
    #[serde(rename = "P")]
    price_change_percent: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "E")]
    event_time: i64,
}

#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
}

#[derive(Debug, Deserialize)]
struct WsDepth {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
    #[serde(rename = "E")]
    event_time: i64,
}

// ============================================================================
// 어댑터
// ============================================================================

/// Binance 시장 데이터 소스.
pub struct BinanceSource {
    descriptor: SourceDescriptor,
    config: BinanceConfig,
    client: Client,
    wire: Arc<BinanceWire>,
}

impl BinanceSource {
    /// 새 Binance 소스를 생성합니다.
    pub fn new(rank: u32, config: BinanceConfig) -> SourceResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SourceError::Transport(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        let wire = Arc::new(BinanceWire {
            ws_url: config.ws_url.clone(),
        });

        Ok(Self {
            descriptor: SourceDescriptor {
                name: "binance".to_string(),
                rank,
                protocols: Protocols::both(),
            },
            config,
            client,
            wire,
        })
    }

    /// 내부 Symbol을 Binance 심볼 형식으로 변환.
    fn format_symbol(symbol: &Symbol) -> String {
        format!("{}{}", symbol.base, symbol.quote)
    }

    fn parse_decimal(s: &str) -> Decimal {
        s.parse().unwrap_or(Decimal::ZERO)
    }

    fn timestamp_from_ms(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
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
        self.handle_response(response).await
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> SourceResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| {
                error!("Failed to parse Binance response: {} - Body: {}", e, body);
                SourceError::Protocol(e.to_string())
            })
        } else if let Ok(api_error) = serde_json::from_str::<BinanceApiError>(&body) {
            Err(Self::map_error_code(api_error.code, &api_error.msg))
        } else {
            Err(SourceError::Api {
                code: status.as_u16() as i32,
                message: body,
            })
        }
    }

    /// Binance 에러 코드를 SourceError로 매핑.
    fn map_error_code(code: i32, msg: &str) -> SourceError {
        match code {
            -1003 | -1015 => SourceError::RateLimited,
            -1001 => SourceError::Transport(msg.to_string()),
            -2014 | -2015 => SourceError::Unauthorized(msg.to_string()),
            _ => SourceError::Api {
                code,
                message: msg.to_string(),
            },
        }
    }
}

#[async_trait]
impl MarketSource for BinanceSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn ping(&self) -> SourceResult<()> {
        let _: serde_json::Value = self.public_get("/fapi/v1/ping", &[]).await?;
        Ok(())
    }

    async fn ticker(&self, symbol: &Symbol) -> SourceResult<Ticker> {
        let resp: BinanceTicker24h = self
            .public_get(
                "/fapi/v1/ticker/24hr",
                &[("symbol", Self::format_symbol(symbol))],
            )
            .await?;

        Ok(Ticker {
            symbol: symbol.clone(),
            last_price: Self::parse_decimal(&resp.last_price),
            price_change: Self::parse_decimal(&resp.price_change),
            price_change_percent: Self::parse_decimal(&resp.price_change_percent),
            high: Self::parse_decimal(&resp.high_price),
            low: Self::parse_decimal(&resp.low_price),
            base_volume: Self::parse_decimal(&resp.volume),
            quote_volume: Self::parse_decimal(&resp.quote_volume),
            timestamp: Utc::now(),
        })
    }

    async fn klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: u32,
    ) -> SourceResult<Vec<Kline>> {
        let resp: Vec<BinanceKline> = self
            .public_get(
                "/fapi/v1/klines",
                &[
                    ("symbol", Self::format_symbol(symbol)),
                    ("interval", timeframe.to_binance_interval().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        // Binance는 과거 → 최신 순으로 내려준다
        Ok(resp
            .into_iter()
            .map(|k| Kline {
                symbol: symbol.clone(),
                timeframe,
                open_time: Self::timestamp_from_ms(k.0),
                open: Self::parse_decimal(&k.1),
                high: Self::parse_decimal(&k.2),
                low: Self::parse_decimal(&k.3),
                close: Self::parse_decimal(&k.4),
                volume: Self::parse_decimal(&k.5),
            })
            .collect())
    }

    async fn depth(&self, symbol: &Symbol, limit: u32) -> SourceResult<OrderBook> {
        let resp: BinanceDepth = self
            .public_get(
                "/fapi/v1/depth",
                &[
                    ("symbol", Self::format_symbol(symbol)),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let level = |[price, qty]: [String; 2]| OrderBookLevel {
            price: Self::parse_decimal(&price),
            quantity: Self::parse_decimal(&qty),
        };

        Ok(OrderBook {
            symbol: symbol.clone(),
            bids: resp.bids.into_iter().map(level).collect(),
            asks: resp.asks.into_iter().map(level).collect(),
            update_id: resp.last_update_id,
            timestamp: Utc::now(),
        })
    }

    async fn funding_rate(&self, symbol: &Symbol) -> SourceResult<FundingRate> {
        let resp: BinancePremiumIndex = self
            .public_get(
                "/fapi/v1/premiumIndex",
                &[("symbol", Self::format_symbol(symbol))],
            )
            .await?;

        Ok(FundingRate {
            symbol: symbol.clone(),
            rate: Self::parse_decimal(&resp.last_funding_rate),
            next_funding_time: Some(Self::timestamp_from_ms(resp.next_funding_time)),
            timestamp: Self::timestamp_from_ms(resp.time),
        })
    }

    async fn mark_price(&self, symbol: &Symbol) -> SourceResult<MarkPrice> {
        let resp: BinancePremiumIndex = self
            .public_get(
                "/fapi/v1/premiumIndex",
                &[("symbol", Self::format_symbol(symbol))],
            )
            .await?;

        Ok(MarkPrice {
            symbol: symbol.clone(),
            mark_price: Self::parse_decimal(&resp.mark_price),
            index_price: Some(Self::parse_decimal(&resp.index_price)),
            timestamp: Self::timestamp_from_ms(resp.time),
        })
    }

    fn wire(&self) -> Option<Arc<dyn SourceWire>> {
        Some(self.wire.clone())
    }
}

// ============================================================================
// WebSocket wire
// ============================================================================

/// Binance WebSocket wire 어댑터.
pub struct BinanceWire {
    ws_url: String,
}

impl SourceWire for BinanceWire {
    fn name(&self) -> &str {
        "binance"
    }

    fn ws_url(&self) -> String {
        self.ws_url.clone()
    }

    fn subscribe_frames(&self, keys: &[StreamKey]) -> Vec<String> {
        if keys.is_empty() {
            return Vec::new();
        }
        // Binance 스트림 이름은 이 피드의 스트림 키 표기와 동일
        let params: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        vec![serde_json::json!({
            "method": "SUBSCRIBE",
            "params": params,
            "id": 1,
        })
        .to_string()]
    }

    fn keepalive(&self) -> KeepAlive {
        // 서버가 ping을 보내고 transport가 pong으로 응답
        KeepAlive::None
    }

    fn parse_message(&self, text: &str) -> Option<(StreamKey, StreamEvent)> {
        if let Ok(ticker) = serde_json::from_str::<WsTicker>(text) {
            if ticker.event_type == "24hrTicker" {
                let symbol = Symbol::from_compact(&ticker.symbol);
                let event = StreamEvent::Ticker(Ticker {
                    symbol: symbol.clone(),
                    last_price: BinanceSource::parse_decimal(&ticker.close),
                    price_change: BinanceSource::parse_decimal(&ticker.price_change),
                    price_change_percent: BinanceSource::parse_decimal(
                        &ticker.price_change_percent,
                    ),
                    high: BinanceSource::parse_decimal(&ticker.high),
                    low: BinanceSource::parse_decimal(&ticker.low),
                    base_volume: BinanceSource::parse_decimal(&ticker.volume),
                    quote_volume: BinanceSource::parse_decimal(&ticker.quote_volume),
                    timestamp: BinanceSource::timestamp_from_ms(ticker.event_time),
                });
                return Some((StreamKey::ticker(symbol), event));
            }
        }

        if let Ok(event) = serde_json::from_str::<WsKlineEvent>(text) {
            if event.event_type == "kline" {
                let symbol = Symbol::from_compact(&event.symbol);
                let timeframe = Timeframe::from_binance_interval(&event.kline.interval)?;
                let k = &event.kline;
                let kline = StreamEvent::Kline(Kline {
                    symbol: symbol.clone(),
                    timeframe,
                    open_time: BinanceSource::timestamp_from_ms(k.open_time),
                    open: BinanceSource::parse_decimal(&k.open),
                    high: BinanceSource::parse_decimal(&k.high),
                    low: BinanceSource::parse_decimal(&k.low),
                    close: BinanceSource::parse_decimal(&k.close),
                    volume: BinanceSource::parse_decimal(&k.volume),
                });
                return Some((StreamKey::kline(symbol, timeframe), kline));
            }
        }

        if let Ok(depth) = serde_json::from_str::<WsDepth>(text) {
            if depth.event_type == "depthUpdate" {
                let symbol = Symbol::from_compact(&depth.symbol);
                let level = |l: &[String; 2]| OrderBookLevel {
                    price: BinanceSource::parse_decimal(&l[0]),
                    quantity: BinanceSource::parse_decimal(&l[1]),
                };
                let event = StreamEvent::Depth(DepthUpdate {
                    symbol: symbol.clone(),
                    first_update_id: depth.first_update_id,
                    final_update_id: depth.final_update_id,
                    bids: depth.bids.iter().map(level).collect(),
                    asks: depth.asks.iter().map(level).collect(),
                    timestamp: BinanceSource::timestamp_from_ms(depth.event_time),
                });
                return Some((StreamKey::depth(symbol, None), event));
            }
        }

        // 구독 ACK 등 무관한 메시지
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wire() -> BinanceWire {
        BinanceWire {
            ws_url: "wss://fstream.binance.com/ws".to_string(),
        }
    }

    #[test]
    fn test_format_symbol() {
        let symbol = Symbol::new("BTC", "USDT");
        assert_eq!(BinanceSource::format_symbol(&symbol), "BTCUSDT");
    }

    #[test]
    fn test_subscribe_frame() {
        let keys = vec![
            "btcusdt@ticker".parse().unwrap(),
            "btcusdt@kline_1m".parse().unwrap(),
        ];
        let frames = wire().subscribe_frames(&keys);
        assert_eq!(frames.len(), 1);

        let parsed: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(parsed["method"], "SUBSCRIBE");
        let params = parsed["params"].as_array().unwrap();
        assert!(params.contains(&serde_json::json!("btcusdt@ticker")));
        assert!(params.contains(&serde_json::json!("btcusdt@kline_1m")));
    }

    #[test]
    fn test_parse_ws_ticker() {
        let text = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"500.0","P":"1.01","c":"50000.5","h":"51000","l":"49000","v":"12345.6","q":"617000000"}"#;

        let (key, event) = wire().parse_message(text).unwrap();
        assert_eq!(key, StreamKey::ticker(Symbol::new("BTC", "USDT")));

        let StreamEvent::Ticker(ticker) = event else {
            panic!("expected ticker event");
        };
        assert_eq!(ticker.last_price, dec!(50000.5));
        assert_eq!(ticker.price_change, dec!(500.0));
        assert_eq!(ticker.price_change_percent, dec!(1.01));
    }

    #[test]
    fn test_parse_ws_kline() {
        let text = r#"{"e":"kline","E":1700000000000,"s":"ETHUSDT","k":{"t":1700000000000,"T":1700000059999,"s":"ETHUSDT","i":"1m","o":"2000","h":"2010","l":"1995","c":"2005","v":"321.5","x":false}}"#;

        let (key, event) = wire().parse_message(text).unwrap();
        assert_eq!(
            key,
            StreamKey::kline(Symbol::new("ETH", "USDT"), Timeframe::M1)
        );

        let StreamEvent::Kline(kline) = event else {
            panic!("expected kline event");
        };
        assert_eq!(kline.close, dec!(2005));
        assert_eq!(kline.timeframe, Timeframe::M1);
    }

    #[test]
    fn test_parse_ws_depth() {
        let text = r#"{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDT","U":100,"u":105,"b":[["50000","1.5"]],"a":[["50001","0"]]}"#;

        let (key, event) = wire().parse_message(text).unwrap();
        assert_eq!(key, StreamKey::depth(Symbol::new("BTC", "USDT"), None));

        let StreamEvent::Depth(update) = event else {
            panic!("expected depth event");
        };
        assert_eq!(update.first_update_id, 100);
        assert_eq!(update.final_update_id, 105);
        assert_eq!(update.asks[0].quantity, dec!(0));
    }

    #[test]
    fn test_irrelevant_message_dropped() {
        assert!(wire().parse_message(r#"{"result":null,"id":1}"#).is_none());
        assert!(wire().parse_message("not json at all").is_none());
    }

    #[test]
    fn test_error_code_mapping() {
        assert!(matches!(
            BinanceSource::map_error_code(-1003, "banned"),
            SourceError::RateLimited
        ));
        assert!(matches!(
            BinanceSource::map_error_code(-2014, "bad key"),
            SourceError::Unauthorized(_)
        ));
        assert!(matches!(
            BinanceSource::map_error_code(-4003, "quantity"),
            SourceError::Api { code: -4003, .. }
        ));
    }

    #[tokio::test]
    async fn test_rest_ticker_normalization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v1/ticker/24hr?symbol=BTCUSDT")
            .with_status(200)
            .with_body(
                r#"{"symbol":"BTCUSDT","priceChange":"-94.99999800","priceChangePercent":"-95.960","lastPrice":"4.00000200","highPrice":"100.0","lowPrice":"0.1","volume":"8913.3","quoteVolume":"15.30"}"#,
            )
            .create_async()
            .await;

        let source = BinanceSource::new(
            0,
            BinanceConfig {
                rest_base_url: server.url(),
                ..Default::default()
            },
        )
        .unwrap();

        let ticker = source.ticker(&Symbol::new("BTC", "USDT")).await.unwrap();
        assert_eq!(ticker.last_price, dec!(4.000002));
        assert_eq!(ticker.price_change_percent, dec!(-95.960));
        assert_eq!(ticker.base_volume, dec!(8913.3));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rest_api_error_mapped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/ticker/24hr?symbol=BTCUSDT")
            .with_status(429)
            .with_body(r#"{"code":-1003,"msg":"Too many requests."}"#)
            .create_async()
            .await;

        let source = BinanceSource::new(
            0,
            BinanceConfig {
                rest_base_url: server.url(),
                ..Default::default()
            },
        )
        .unwrap();

        let err = source.ticker(&Symbol::new("BTC", "USDT")).await.unwrap_err();
        assert!(matches!(err, SourceError::RateLimited));
    }
}
