//! 스트림 키.
//!
//! 구독 키는 `{symbol}@{channel}[@{param}]` 형식을 따릅니다:
//! `btcusdt@ticker`, `btcusdt@kline_1m`, `btcusdt@depth@100ms`.

use feed_core::{FeedError, Symbol, Timeframe};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 스트림 채널.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamChannel {
    /// 시세 스트림
    Ticker,
    /// 캔들 스트림
    Kline(Timeframe),
    /// 호가창 증분 스트림. speed는 거래소별 갱신 주기 파라미터.
    Depth {
        /// 갱신 주기 (예: "100ms"), 없으면 거래소 기본값
        speed: Option<String>,
    },
}

/// 구독 스트림 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 채널
    pub channel: StreamChannel,
}

impl StreamKey {
    /// 시세 스트림 키를 생성합니다.
    pub fn ticker(symbol: Symbol) -> Self {
        Self {
            symbol,
            channel: StreamChannel::Ticker,
        }
    }

    /// 캔들 스트림 키를 생성합니다.
    pub fn kline(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self {
            symbol,
            channel: StreamChannel::Kline(timeframe),
        }
    }

    /// 호가창 스트림 키를 생성합니다.
    pub fn depth(symbol: Symbol, speed: Option<String>) -> Self {
        Self {
            symbol,
            channel: StreamChannel::Depth { speed },
        }
    }

    /// 수신 이벤트의 키가 이 구독에 해당하는지 확인합니다.
    ///
    /// depth의 speed 파라미터는 wire 수준 옵션이므로 매칭에서 무시합니다.
    pub fn matches(&self, incoming: &StreamKey) -> bool {
        if self.symbol != incoming.symbol {
            return false;
        }
        match (&self.channel, &incoming.channel) {
            (StreamChannel::Ticker, StreamChannel::Ticker) => true,
            (StreamChannel::Kline(a), StreamChannel::Kline(b)) => a == b,
            (StreamChannel::Depth { .. }, StreamChannel::Depth { .. }) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = self.symbol.to_compact();
        match &self.channel {
            StreamChannel::Ticker => write!(f, "{}@ticker", symbol),
            StreamChannel::Kline(tf) => write!(f, "{}@kline_{}", symbol, tf),
            StreamChannel::Depth { speed: None } => write!(f, "{}@depth", symbol),
            StreamChannel::Depth { speed: Some(speed) } => {
                write!(f, "{}@depth@{}", symbol, speed)
            }
        }
    }
}

impl FromStr for StreamKey {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('@');
        let symbol = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| FeedError::InvalidInput(format!("empty stream key: {:?}", s)))?;
        let channel = parts
            .next()
            .ok_or_else(|| FeedError::InvalidInput(format!("missing channel: {:?}", s)))?;
        let param = parts.next();

        if parts.next().is_some() {
            return Err(FeedError::InvalidInput(format!(
                "too many segments: {:?}",
                s
            )));
        }

        let symbol = Symbol::from_compact(symbol);

        let channel = match channel {
            "ticker" => StreamChannel::Ticker,
            "depth" => StreamChannel::Depth {
                speed: param.map(|p| p.to_string()),
            },
            c if c.starts_with("kline_") => {
                let interval = &c["kline_".len()..];
                let timeframe = Timeframe::from_binance_interval(interval).ok_or_else(|| {
                    FeedError::InvalidInput(format!("unknown kline interval: {:?}", interval))
                })?;
                StreamChannel::Kline(timeframe)
            }
            other => {
                return Err(FeedError::InvalidInput(format!(
                    "unknown channel: {:?}",
                    other
                )))
            }
        };

        Ok(StreamKey { symbol, channel })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ticker_key() {
        let key: StreamKey = "btcusdt@ticker".parse().unwrap();
        assert_eq!(key.symbol, Symbol::new("BTC", "USDT"));
        assert_eq!(key.channel, StreamChannel::Ticker);
        assert_eq!(key.to_string(), "btcusdt@ticker");
    }

    #[test]
    fn test_parse_kline_key() {
        let key: StreamKey = "btcusdt@kline_1m".parse().unwrap();
        assert_eq!(key.channel, StreamChannel::Kline(Timeframe::M1));
        assert_eq!(key.to_string(), "btcusdt@kline_1m");
    }

    #[test]
    fn test_parse_depth_key_with_speed() {
        let key: StreamKey = "btcusdt@depth@100ms".parse().unwrap();
        assert_eq!(
            key.channel,
            StreamChannel::Depth { speed: Some("100ms".to_string()) }
        );
        assert_eq!(key.to_string(), "btcusdt@depth@100ms");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("btcusdt".parse::<StreamKey>().is_err());
        assert!("btcusdt@candles".parse::<StreamKey>().is_err());
        assert!("btcusdt@kline_7x".parse::<StreamKey>().is_err());
        assert!("btcusdt@depth@100ms@extra".parse::<StreamKey>().is_err());
    }

    #[test]
    fn test_depth_matching_ignores_speed() {
        let subscribed: StreamKey = "btcusdt@depth@100ms".parse().unwrap();
        let incoming = StreamKey::depth(Symbol::new("BTC", "USDT"), None);
        assert!(subscribed.matches(&incoming));

        let other_symbol = StreamKey::depth(Symbol::new("ETH", "USDT"), None);
        assert!(!subscribed.matches(&other_symbol));
    }

    #[test]
    fn test_kline_matching_requires_same_timeframe() {
        let subscribed: StreamKey = "btcusdt@kline_1m".parse().unwrap();
        let same = StreamKey::kline(Symbol::new("BTC", "USDT"), Timeframe::M1);
        let other = StreamKey::kline(Symbol::new("BTC", "USDT"), Timeframe::M5);
        assert!(subscribed.matches(&same));
        assert!(!subscribed.matches(&other));
    }
}
