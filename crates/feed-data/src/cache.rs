//! 신선도 캐시.
//!
//! (데이터 종류, 요청 키)별로 마지막으로 성공한 값과 수신 시각만
//! 저장합니다. 나이/신선도/신뢰도는 저장하지 않고 읽는 시점에
//! 계산합니다. 종류별 최대 나이를 넘은 엔트리는 페일오버 대체값으로
//! 쓰이지 않으며, 최대 나이의 2배를 넘으면 스윕에서 제거됩니다.

use crate::mirror::{MirrorEntry, MirrorSnapshot, MirrorStore};
use feed_core::{CacheConfig, Sourced};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// 캐시되는 데이터 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// 24시간 시세
    Ticker,
    /// 캔들 목록
    Klines,
    /// 호가창 스냅샷
    Depth,
    /// 펀딩 비율
    FundingRate,
    /// 마크 가격
    MarkPrice,
    /// 계좌 스냅샷
    Account,
}

impl DataKind {
    /// 문자열 표기를 반환합니다 (미러 직렬화용).
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Ticker => "ticker",
            DataKind::Klines => "klines",
            DataKind::Depth => "depth",
            DataKind::FundingRate => "funding_rate",
            DataKind::MarkPrice => "mark_price",
            DataKind::Account => "account",
        }
    }

    /// 문자열 표기에서 파싱합니다.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ticker" => Some(DataKind::Ticker),
            "klines" => Some(DataKind::Klines),
            "depth" => Some(DataKind::Depth),
            "funding_rate" => Some(DataKind::FundingRate),
            "mark_price" => Some(DataKind::MarkPrice),
            "account" => Some(DataKind::Account),
            _ => None,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 종류별 최대 나이 정책.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    config: CacheConfig,
}

impl CachePolicy {
    /// 설정에서 정책을 생성합니다.
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    /// 이 종류의 캐시를 대체값으로 쓸 수 있는 최대 나이.
    pub fn max_age(&self, kind: DataKind) -> Duration {
        let secs = match kind {
            DataKind::Ticker => self.config.ticker_max_age_secs,
            DataKind::Klines => self.config.kline_max_age_secs,
            DataKind::Depth => self.config.depth_max_age_secs,
            DataKind::FundingRate => self.config.funding_max_age_secs,
            DataKind::MarkPrice => self.config.mark_price_max_age_secs,
            DataKind::Account => self.config.account_max_age_secs,
        };
        Duration::from_secs(secs)
    }

    /// 이 나이를 넘으면 스윕에서 제거됩니다.
    pub fn retention(&self, kind: DataKind) -> Duration {
        self.max_age(kind) * 2
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    payload: serde_json::Value,
    source: String,
    fetched_at: DateTime<Utc>,
}

/// 마지막 성공 값 캐시.
pub struct FreshnessCache {
    policy: CachePolicy,
    entries: RwLock<HashMap<(DataKind, String), Entry>>,
    mirror: Option<Arc<dyn MirrorStore>>,
}

impl FreshnessCache {
    /// 새 캐시를 생성합니다.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: RwLock::new(HashMap::new()),
            mirror: None,
        }
    }

    /// 미러 저장소를 연결합니다.
    pub fn with_mirror(mut self, mirror: Arc<dyn MirrorStore>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// 정책을 반환합니다.
    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// 미러에서 마지막 세션의 값을 복원합니다.
    pub async fn restore(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let Some(snapshot) = mirror.load().await else {
            return;
        };

        let mut restored = 0usize;
        for entry in snapshot.entries {
            let Some(kind) = DataKind::from_str(&entry.kind) else {
                continue;
            };
            if self.insert_if_newer(kind, entry.key, entry.source, entry.payload, entry.fetched_at)
            {
                restored += 1;
            }
        }
        debug!(restored, "캐시 미러 복원 완료");
    }

    /// 성공한 fetch 결과를 저장합니다.
    ///
    /// 수신 시각은 호출 시점입니다. 기존 엔트리보다 오래된 시각으로는
    /// 절대 덮어쓰지 않으므로, 키별 타임스탬프는 단조 비감소합니다.
    pub async fn put<T: Serialize>(
        &self,
        kind: DataKind,
        key: &str,
        source: &str,
        value: &T,
    ) {
        self.put_at(kind, key, source, value, Utc::now()).await;
    }

    /// 지정한 수신 시각으로 저장합니다 (복원/테스트용).
    pub async fn put_at<T: Serialize>(
        &self,
        kind: DataKind,
        key: &str,
        source: &str,
        value: &T,
        fetched_at: DateTime<Utc>,
    ) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(kind = %kind, key, error = %e, "캐시 직렬화 실패, 저장 안 함");
                return;
            }
        };

        if self.insert_if_newer(kind, key.to_string(), source.to_string(), payload, fetched_at) {
            self.write_mirror().await;
        }
    }

    /// 최대 나이 이내의 캐시 값을 반환합니다.
    ///
    /// 나이를 넘었거나 역직렬화가 깨진 엔트리는 miss로 취급합니다.
    pub fn get_fresh<T: DeserializeOwned>(&self, kind: DataKind, key: &str) -> Option<Sourced<T>> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(&(kind, key.to_string()))?;

        let age = Utc::now()
            .signed_duration_since(entry.fetched_at)
            .to_std()
            .unwrap_or_default();
        if age > self.policy.max_age(kind) {
            return None;
        }

        let data: T = serde_json::from_value(entry.payload.clone()).ok()?;
        Some(Sourced::cached(data, entry.source.clone(), entry.fetched_at))
    }

    /// 엔트리의 수신 시각을 반환합니다.
    pub fn fetched_at(&self, kind: DataKind, key: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().unwrap();
        entries.get(&(kind, key.to_string())).map(|e| e.fetched_at)
    }

    /// 저장된 엔트리 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// 캐시가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 보존 한도(최대 나이의 2배)를 넘은 엔트리를 제거합니다.
    ///
    /// 제거된 엔트리 수를 반환합니다.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let removed = {
            let mut entries = self.entries.write().unwrap();
            let before = entries.len();
            entries.retain(|(kind, _), entry| {
                let age = now
                    .signed_duration_since(entry.fetched_at)
                    .to_std()
                    .unwrap_or_default();
                age <= self.policy.retention(*kind)
            });
            before - entries.len()
        };

        if removed > 0 {
            debug!(removed, "만료 캐시 엔트리 제거");
            self.write_mirror().await;
        }
        removed
    }

    /// 주기적 스윕 태스크를 시작합니다.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    fn insert_if_newer(
        &self,
        kind: DataKind,
        key: String,
        source: String,
        payload: serde_json::Value,
        fetched_at: DateTime<Utc>,
    ) -> bool {
        let mut entries = self.entries.write().unwrap();
        if let Some(existing) = entries.get(&(kind, key.clone())) {
            if existing.fetched_at > fetched_at {
                return false;
            }
        }
        entries.insert(
            (kind, key),
            Entry {
                payload,
                source,
                fetched_at,
            },
        );
        true
    }

    async fn write_mirror(&self) {
        let Some(mirror) = &self.mirror else {
            return;
        };

        let snapshot = {
            let entries = self.entries.read().unwrap();
            MirrorSnapshot {
                entries: entries
                    .iter()
                    .map(|((kind, key), entry)| MirrorEntry {
                        kind: kind.as_str().to_string(),
                        key: key.clone(),
                        source: entry.source.clone(),
                        fetched_at: entry.fetched_at,
                        payload: entry.payload.clone(),
                    })
                    .collect(),
            }
        };

        // best-effort: 미러 실패는 피드를 멈추지 않는다
        if let Err(e) = mirror.save(&snapshot).await {
            warn!(error = %e, "캐시 미러 쓰기 실패, 무시");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MemoryMirror;
    use feed_core::Reality;

    fn cache() -> FreshnessCache {
        FreshnessCache::new(CachePolicy::default())
    }

    #[tokio::test]
    async fn test_put_then_get_fresh() {
        let cache = cache();
        cache.put(DataKind::Ticker, "BTC/USDT", "binance", &42u32).await;

        let hit: Sourced<u32> = cache.get_fresh(DataKind::Ticker, "BTC/USDT").unwrap();
        assert_eq!(hit.data, 42);
        assert_eq!(hit.meta.reality, Reality::Cached);
        assert_eq!(hit.meta.source, "binance");
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let cache = cache();
        let old = Utc::now() - chrono::Duration::seconds(120); // ticker 최대 나이 60초
        cache
            .put_at(DataKind::Ticker, "BTC/USDT", "binance", &42u32, old)
            .await;

        let hit: Option<Sourced<u32>> = cache.get_fresh(DataKind::Ticker, "BTC/USDT");
        assert!(hit.is_none());

        // kline은 최대 나이 1시간이라 같은 나이로도 hit
        cache
            .put_at(DataKind::Klines, "BTC/USDT", "binance", &7u32, old)
            .await;
        let hit: Option<Sourced<u32>> = cache.get_fresh(DataKind::Klines, "BTC/USDT");
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn test_timestamps_monotonic() {
        let cache = cache();
        let newer = Utc::now();
        let older = newer - chrono::Duration::seconds(10);

        cache
            .put_at(DataKind::Ticker, "BTC/USDT", "binance", &1u32, newer)
            .await;
        // 더 오래된 시각으로는 덮어쓰지 않는다
        cache
            .put_at(DataKind::Ticker, "BTC/USDT", "okx", &2u32, older)
            .await;

        assert_eq!(cache.fetched_at(DataKind::Ticker, "BTC/USDT"), Some(newer));
        let hit: Sourced<u32> = cache.get_fresh(DataKind::Ticker, "BTC/USDT").unwrap();
        assert_eq!(hit.data, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_past_retention() {
        let cache = cache();
        // ticker 보존 한도 = 120초
        let ancient = Utc::now() - chrono::Duration::seconds(300);
        cache
            .put_at(DataKind::Ticker, "BTC/USDT", "binance", &1u32, ancient)
            .await;
        cache.put(DataKind::Ticker, "ETH/USDT", "binance", &2u32).await;

        let removed = cache.sweep().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.fetched_at(DataKind::Ticker, "ETH/USDT").is_some());
    }

    #[tokio::test]
    async fn test_mirror_restore() {
        let mirror = Arc::new(MemoryMirror::new());
        let cache = FreshnessCache::new(CachePolicy::default()).with_mirror(mirror.clone());
        cache.put(DataKind::MarkPrice, "BTC/USDT", "bybit", &99u32).await;

        // 새 캐시 인스턴스 = 프로세스 재시작
        let reloaded = FreshnessCache::new(CachePolicy::default()).with_mirror(mirror);
        assert!(reloaded.is_empty());
        reloaded.restore().await;

        let hit: Sourced<u32> = reloaded.get_fresh(DataKind::MarkPrice, "BTC/USDT").unwrap();
        assert_eq!(hit.data, 99);
        assert_eq!(hit.meta.source, "bybit");
    }

    #[tokio::test]
    async fn test_kinds_do_not_collide() {
        let cache = cache();
        cache.put(DataKind::Ticker, "BTC/USDT", "binance", &1u32).await;
        cache.put(DataKind::MarkPrice, "BTC/USDT", "binance", &2u32).await;

        let ticker: Sourced<u32> = cache.get_fresh(DataKind::Ticker, "BTC/USDT").unwrap();
        let mark: Sourced<u32> = cache.get_fresh(DataKind::MarkPrice, "BTC/USDT").unwrap();
        assert_eq!(ticker.data, 1);
        assert_eq!(mark.data, 2);
    }
}
