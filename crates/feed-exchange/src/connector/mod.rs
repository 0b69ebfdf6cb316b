//! 거래소별 소스 어댑터.

pub mod binance;
pub mod bybit;
pub mod okx;

pub use binance::{BinanceConfig, BinanceSource, BinanceWire};
pub use bybit::{BybitConfig, BybitSource, BybitWire};
pub use okx::{OkxConfig, OkxSource, OkxWire};

use crate::error::{SourceError, SourceResult};
use crate::traits::MarketSource;
use feed_core::SourcesConfig;
use std::sync::Arc;

/// 설정의 순위 목록대로 소스 어댑터를 생성합니다.
///
/// 목록 순서가 곧 우선순위입니다 (앞쪽이 선호).
pub fn build_sources(config: &SourcesConfig) -> SourceResult<Vec<Arc<dyn MarketSource>>> {
    let mut sources: Vec<Arc<dyn MarketSource>> = Vec::new();

    for (rank, name) in config.ranked.iter().enumerate() {
        let rank = rank as u32;
        let rest_override = config.rest_url_overrides.get(name).cloned();
        let ws_override = config.ws_url_overrides.get(name).cloned();

        let source: Arc<dyn MarketSource> = match name.as_str() {
            "binance" => {
                let mut cfg = BinanceConfig::default();
                if let Some(url) = rest_override {
                    cfg.rest_base_url = url;
                }
                if let Some(url) = ws_override {
                    cfg.ws_url = url;
                }
                Arc::new(BinanceSource::new(rank, cfg)?)
            }
            "okx" => {
                let mut cfg = OkxConfig::default();
                if let Some(url) = rest_override {
                    cfg.rest_base_url = url;
                }
                if let Some(url) = ws_override {
                    cfg.ws_url = url;
                }
                Arc::new(OkxSource::new(rank, cfg)?)
            }
            "bybit" => {
                let mut cfg = BybitConfig::default();
                if let Some(url) = rest_override {
                    cfg.rest_base_url = url;
                }
                if let Some(url) = ws_override {
                    cfg.ws_url = url;
                }
                Arc::new(BybitSource::new(rank, cfg)?)
            }
            other => {
                return Err(SourceError::NotSupported(format!(
                    "unknown source: {}",
                    other
                )))
            }
        };

        sources.push(source);
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sources_in_rank_order() {
        let config = SourcesConfig::default();
        let sources = build_sources(&config).unwrap();

        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["binance", "okx", "bybit"]);
        assert_eq!(sources[0].descriptor().rank, 0);
        assert_eq!(sources[2].descriptor().rank, 2);
    }

    #[test]
    fn test_build_sources_rejects_unknown() {
        let config = SourcesConfig {
            ranked: vec!["binance".to_string(), "ftx".to_string()],
            ..Default::default()
        };
        assert!(build_sources(&config).is_err());
    }
}
