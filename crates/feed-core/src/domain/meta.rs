//! 신선도/출처 메타데이터.
//!
//! 화면에 표시되는 모든 값은 라이브(`Real`), 캐시(`Cached`),
//! 없음(`Unavailable`) 중 무엇인지 끝까지 구분되어야 합니다.
//! 나이, 신선도 등급, 신뢰도는 항상 읽는 시점에 계산하며 저장하지 않습니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 표시 값의 출처 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reality {
    /// 방금 소스에서 받은 라이브 값
    Real,
    /// 과거에 성공적으로 받아 캐시된 값
    Cached,
    /// 소스와 캐시 모두 실패 - 값 없음
    Unavailable,
}

impl fmt::Display for Reality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reality::Real => write!(f, "real"),
            Reality::Cached => write!(f, "cached"),
            Reality::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// 캐시 데이터 나이의 신선도 등급.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Staleness {
    /// 10초 미만
    Fresh,
    /// 60초 미만
    Acceptable,
    /// 5분 미만
    Stale,
    /// 1시간 미만
    VeryStale,
    /// 1시간 이상
    Expired,
}

impl Staleness {
    /// 나이에서 신선도 등급을 도출합니다.
    pub fn from_age(age: Duration) -> Self {
        let secs = age.as_secs();
        if secs < 10 {
            Staleness::Fresh
        } else if secs < 60 {
            Staleness::Acceptable
        } else if secs < 5 * 60 {
            Staleness::Stale
        } else if secs < 60 * 60 {
            Staleness::VeryStale
        } else {
            Staleness::Expired
        }
    }

    /// UI 신뢰도 표시용 계단 함수. 제어 흐름에는 사용하지 않습니다.
    pub fn confidence(&self) -> f64 {
        match self {
            Staleness::Fresh => 0.95,
            Staleness::Acceptable => 0.85,
            Staleness::Stale => 0.6,
            Staleness::VeryStale => 0.4,
            Staleness::Expired => 0.2,
        }
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Fresh => write!(f, "fresh"),
            Staleness::Acceptable => write!(f, "acceptable"),
            Staleness::Stale => write!(f, "stale"),
            Staleness::VeryStale => write!(f, "very_stale"),
            Staleness::Expired => write!(f, "expired"),
        }
    }
}

/// 값 하나에 붙는 출처/신선도 메타데이터.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    /// 값을 제공한 소스 이름 (예: "binance")
    pub source: String,
    /// 출처 분류
    pub reality: Reality,
    /// 값을 받아온 시각
    pub timestamp: DateTime<Utc>,
    /// 받아온 후 경과 시간 (밀리초)
    pub age_ms: u64,
    /// 신선도 등급 기준으로 오래된 값인지
    pub is_stale: bool,
    /// UI 표시용 신뢰도 (0.0 ~ 1.0)
    pub confidence: f64,
}

impl SourceMeta {
    /// 방금 받은 라이브 값의 메타데이터를 생성합니다.
    pub fn live(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reality: Reality::Real,
            timestamp: Utc::now(),
            age_ms: 0,
            is_stale: false,
            confidence: Staleness::Fresh.confidence(),
        }
    }

    /// 캐시된 값의 메타데이터를 fetched_at 기준으로 계산합니다.
    pub fn cached(source: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        let age = Utc::now()
            .signed_duration_since(fetched_at)
            .to_std()
            .unwrap_or_default();
        let staleness = Staleness::from_age(age);

        Self {
            source: source.into(),
            reality: Reality::Cached,
            timestamp: fetched_at,
            age_ms: age.as_millis() as u64,
            is_stale: staleness >= Staleness::Stale,
            confidence: staleness.confidence(),
        }
    }

    /// 신선도 등급을 반환합니다.
    pub fn staleness(&self) -> Staleness {
        Staleness::from_age(Duration::from_millis(self.age_ms))
    }
}

/// 메타데이터가 붙은 값.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sourced<T> {
    /// 데이터 본문
    pub data: T,
    /// 출처/신선도 메타데이터
    pub meta: SourceMeta,
}

impl<T> Sourced<T> {
    /// 라이브 값을 래핑합니다.
    pub fn live(data: T, source: impl Into<String>) -> Self {
        Self {
            data,
            meta: SourceMeta::live(source),
        }
    }

    /// 캐시 값을 래핑합니다.
    pub fn cached(data: T, source: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            data,
            meta: SourceMeta::cached(source, fetched_at),
        }
    }
}

/// 값이 없을 때의 명시적 결과.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unavailable {
    /// 데이터 종류 (예: "ticker")
    pub data_kind: String,
    /// 요청 키 (예: "BTC/USDT")
    pub request_key: String,
    /// 마지막 실패 사유
    pub reason: String,
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unavailable for {}: {}",
            self.data_kind, self.request_key, self.reason
        )
    }
}

/// 시장 데이터 읽기 경로의 최종 응답.
///
/// 소스별 실패는 내부에서 흡수되고, 호출자는 값(라이브/캐시) 또는
/// 명시적 unavailable만 봅니다. 0이나 빈 값으로 뭉개지는 일은 없습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum FeedResponse<T> {
    /// 값 있음 (meta.reality로 라이브/캐시 구분)
    Data(Sourced<T>),
    /// 모든 소스와 캐시 실패
    Unavailable(Unavailable),
}

impl<T> FeedResponse<T> {
    /// 값이 있으면 참조를 반환합니다.
    pub fn data(&self) -> Option<&Sourced<T>> {
        match self {
            FeedResponse::Data(sourced) => Some(sourced),
            FeedResponse::Unavailable(_) => None,
        }
    }

    /// 라이브 값인지 확인합니다.
    pub fn is_live(&self) -> bool {
        matches!(self, FeedResponse::Data(s) if s.meta.reality == Reality::Real)
    }

    /// 캐시 값인지 확인합니다.
    pub fn is_cached(&self) -> bool {
        matches!(self, FeedResponse::Data(s) if s.meta.reality == Reality::Cached)
    }

    /// 값이 없는지 확인합니다.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, FeedResponse::Unavailable(_))
    }
}
