//! 설정 관리.
//!
//! 이 모듈은 피드 애플리케이션 설정을 정의하고 관리합니다.
//! 파일(TOML) → 환경 변수(`FEED__` 접두어) 순으로 오버라이드됩니다.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeedConfig {
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 소스(거래소) 설정
    #[serde(default)]
    pub sources: SourcesConfig,
    /// REST 페일오버 설정
    #[serde(default)]
    pub failover: FailoverConfig,
    /// WebSocket 스트림 설정
    #[serde(default)]
    pub stream: StreamConfig,
    /// 캐시 설정
    #[serde(default)]
    pub cache: CacheConfig,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// 소스(거래소) 설정.
///
/// 순위는 목록 순서로 결정됩니다 (앞쪽이 우선).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    /// 활성화할 소스 이름, 우선순위 순서
    pub ranked: Vec<String>,
    /// REST 기본 URL 오버라이드 (소스 이름 → URL)
    #[serde(default)]
    pub rest_url_overrides: std::collections::HashMap<String, String>,
    /// WebSocket URL 오버라이드 (소스 이름 → URL)
    #[serde(default)]
    pub ws_url_overrides: std::collections::HashMap<String, String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            ranked: vec![
                "binance".to_string(),
                "okx".to_string(),
                "bybit".to_string(),
            ],
            rest_url_overrides: Default::default(),
            ws_url_overrides: Default::default(),
        }
    }
}

/// REST 페일오버 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FailoverConfig {
    /// 소스별 시도 타임아웃 (밀리초)
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// 연속 실패 임계치 (도달 시 unhealthy)
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    /// unhealthy 소스 재탐색 쿨다운 (초)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// 주기적 헬스 체크 간격 (초)
    #[serde(default = "default_health_tick_secs")]
    pub health_tick_secs: u64,
    /// 계좌 스냅샷 재사용 한도 (초)
    #[serde(default = "default_account_snapshot_secs")]
    pub account_snapshot_secs: u64,
}

fn default_attempt_timeout_ms() -> u64 {
    2500
}
fn default_unhealthy_threshold() -> u32 {
    4
}
fn default_cooldown_secs() -> u64 {
    300 // 5분
}
fn default_health_tick_secs() -> u64 {
    30
}
fn default_account_snapshot_secs() -> u64 {
    60
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: default_attempt_timeout_ms(),
            unhealthy_threshold: default_unhealthy_threshold(),
            cooldown_secs: default_cooldown_secs(),
            health_tick_secs: default_health_tick_secs(),
            account_snapshot_secs: default_account_snapshot_secs(),
        }
    }
}

/// WebSocket 스트림 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// 재연결 백오프 시작값 (밀리초)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: f64,
    /// 연속 실패당 백오프 배수
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// 백오프 상한 (밀리초)
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: f64,
}

fn default_backoff_base_ms() -> f64 {
    1000.0
}
fn default_backoff_factor() -> f64 {
    1.5
}
fn default_backoff_cap_ms() -> f64 {
    30_000.0
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_factor: default_backoff_factor(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

/// 캐시 설정.
///
/// 종류별 최대 허용 나이. 이 나이를 넘은 캐시는 페일오버 대체값으로
/// 쓰이지 않으며, 2배를 넘으면 주기적 스윕에서 제거됩니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// 시세 최대 나이 (초)
    #[serde(default = "default_ticker_max_age_secs")]
    pub ticker_max_age_secs: u64,
    /// 호가창 최대 나이 (초)
    #[serde(default = "default_depth_max_age_secs")]
    pub depth_max_age_secs: u64,
    /// 캔들 최대 나이 (초)
    #[serde(default = "default_kline_max_age_secs")]
    pub kline_max_age_secs: u64,
    /// 펀딩 비율 최대 나이 (초)
    #[serde(default = "default_funding_max_age_secs")]
    pub funding_max_age_secs: u64,
    /// 마크 가격 최대 나이 (초)
    #[serde(default = "default_mark_price_max_age_secs")]
    pub mark_price_max_age_secs: u64,
    /// 계좌 스냅샷 최대 나이 (초)
    #[serde(default = "default_account_max_age_secs")]
    pub account_max_age_secs: u64,
    /// 만료 엔트리 스윕 간격 (초)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// 캐시 미러 파일 경로 (없으면 미러링 안 함)
    #[serde(default)]
    pub mirror_path: Option<String>,
}

fn default_ticker_max_age_secs() -> u64 {
    60
}
fn default_depth_max_age_secs() -> u64 {
    30
}
fn default_kline_max_age_secs() -> u64 {
    3600
}
fn default_funding_max_age_secs() -> u64 {
    600
}
fn default_mark_price_max_age_secs() -> u64 {
    60
}
fn default_account_max_age_secs() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ticker_max_age_secs: default_ticker_max_age_secs(),
            depth_max_age_secs: default_depth_max_age_secs(),
            kline_max_age_secs: default_kline_max_age_secs(),
            funding_max_age_secs: default_funding_max_age_secs(),
            mark_price_max_age_secs: default_mark_price_max_age_secs(),
            account_max_age_secs: default_account_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            mirror_path: None,
        }
    }
}

impl FeedConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FEED")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// 환경 변수만으로 설정을 로드합니다 (파일 없이 기본값 + 오버라이드).
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("FEED")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ranked_sources() {
        let config = FeedConfig::default();
        assert_eq!(config.sources.ranked, vec!["binance", "okx", "bybit"]);
    }

    #[test]
    fn test_default_backoff_parameters() {
        let config = StreamConfig::default();
        assert_eq!(config.backoff_base_ms, 1000.0);
        assert_eq!(config.backoff_factor, 1.5);
        assert_eq!(config.backoff_cap_ms, 30_000.0);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = FeedConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: FeedConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.failover.cooldown_secs, 300);
        assert_eq!(parsed.cache.kline_max_age_secs, 3600);
    }
}
