//! REST 페일오버 라우터.
//!
//! 데이터 종류마다 "try A, catch, try B, catch..." 체인을 반복하는 대신,
//! 순위 소스 목록 위에서 타임아웃과 헬스 필터링을 적용하는 하나의 공통
//! 알고리즘을 종류별 fetch 함수와 검증 정책으로 파라미터화합니다.
//!
//! 호출당 흐름: 선호 소스부터 시도 → 실패(비정상 응답, 타임아웃, 파싱
//! 실패, 검증 거부)하면 아직 시도하지 않은 다음 순위 소스로 → 전부
//! 소진되면 종류별 최대 나이 이내의 캐시 → 그것도 없으면 명시적
//! unavailable. 데이터를 지어내는 일은 없습니다.

use crate::error::{SourceError, SourceResult};
use crate::health::HealthRegistry;
use crate::traits::MarketSource;
use feed_core::{
    FailoverConfig, FeedResponse, FundingRate, Kline, MarkPrice, OrderBook, Sourced, Symbol,
    Ticker, Timeframe, Unavailable,
};
use feed_data::{DataKind, FreshnessCache, Validator};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 순위 소스 페일오버 라우터.
pub struct FailoverRouter {
    sources: Vec<Arc<dyn MarketSource>>,
    health: Arc<HealthRegistry>,
    cache: Arc<FreshnessCache>,
    validator: Validator,
    /// 현재 선호 소스 인덱스 (헬스 틱이 승격)
    preferred: AtomicUsize,
    attempt_timeout: Duration,
    health_tick: Duration,
}

impl FailoverRouter {
    /// 새 라우터를 생성합니다. `sources`는 순위 순서여야 합니다.
    pub fn new(
        sources: Vec<Arc<dyn MarketSource>>,
        health: Arc<HealthRegistry>,
        cache: Arc<FreshnessCache>,
        config: &FailoverConfig,
    ) -> Self {
        Self {
            sources,
            health,
            cache,
            validator: Validator::default(),
            preferred: AtomicUsize::new(0),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            health_tick: Duration::from_secs(config.health_tick_secs),
        }
    }

    /// 검증기를 교체합니다.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// 헬스 레지스트리를 반환합니다.
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// 현재 선호 소스 이름을 반환합니다.
    pub fn preferred_source(&self) -> Option<String> {
        let idx = self
            .preferred
            .load(Ordering::Relaxed)
            .min(self.sources.len().saturating_sub(1));
        self.sources.get(idx).map(|s| s.name().to_string())
    }

    // === 데이터 종류별 작업 ===

    /// 24시간 시세.
    pub async fn ticker(&self, symbol: &Symbol) -> FeedResponse<Ticker> {
        let key = symbol.to_string();
        let validator = self.validator.clone();
        self.fetch_with_failover(
            DataKind::Ticker,
            &key,
            |source| {
                let symbol = symbol.clone();
                async move { source.ticker(&symbol).await }.boxed()
            },
            move |ticker| validator.validate_ticker(ticker).map_err(Into::into),
        )
        .await
    }

    /// 캔들 목록. 요청 키에 타임프레임과 개수가 포함됩니다.
    pub async fn klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: u32,
    ) -> FeedResponse<Vec<Kline>> {
        let key = format!("{}:{}:{}", symbol, timeframe, limit);
        let validator = self.validator.clone();
        self.fetch_with_failover(
            DataKind::Klines,
            &key,
            |source| {
                let symbol = symbol.clone();
                async move { source.klines(&symbol, timeframe, limit).await }.boxed()
            },
            move |klines: &Vec<Kline>| validator.validate_klines(klines).map_err(Into::into),
        )
        .await
    }

    /// 호가창 스냅샷.
    pub async fn depth(&self, symbol: &Symbol, limit: u32) -> FeedResponse<OrderBook> {
        let key = symbol.to_string();
        let validator = self.validator.clone();
        self.fetch_with_failover(
            DataKind::Depth,
            &key,
            |source| {
                let symbol = symbol.clone();
                async move { source.depth(&symbol, limit).await }.boxed()
            },
            move |book| validator.validate_depth(book).map_err(Into::into),
        )
        .await
    }

    /// 펀딩 비율.
    pub async fn funding_rate(&self, symbol: &Symbol) -> FeedResponse<FundingRate> {
        let key = symbol.to_string();
        self.fetch_with_failover(
            DataKind::FundingRate,
            &key,
            |source| {
                let symbol = symbol.clone();
                async move { source.funding_rate(&symbol).await }.boxed()
            },
            |_| Ok(()),
        )
        .await
    }

    /// 마크 가격.
    pub async fn mark_price(&self, symbol: &Symbol) -> FeedResponse<MarkPrice> {
        let key = symbol.to_string();
        let validator = self.validator.clone();
        self.fetch_with_failover(
            DataKind::MarkPrice,
            &key,
            |source| {
                let symbol = symbol.clone();
                async move { source.mark_price(&symbol).await }.boxed()
            },
            move |mark| validator.validate_mark_price(mark).map_err(Into::into),
        )
        .await
    }

    // === 공통 알고리즘 ===

    /// 순위 소스 위에서의 공통 시도 알고리즘.
    async fn fetch_with_failover<T, F, V>(
        &self,
        kind: DataKind,
        key: &str,
        fetch: F,
        validate: V,
    ) -> FeedResponse<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: Fn(Arc<dyn MarketSource>) -> BoxFuture<'static, SourceResult<T>>,
        V: Fn(&T) -> SourceResult<()>,
    {
        let mut last_error: Option<SourceError> = None;

        for source in self.attempt_order() {
            let name = source.name().to_string();

            // unhealthy 소스는 쿨다운 전까지 건너뛴다
            if !self.health.is_available(&name) {
                debug!(source = %name, kind = %kind, "unhealthy 소스 건너뜀");
                continue;
            }

            let started = Instant::now();
            match tokio::time::timeout(self.attempt_timeout, fetch(source.clone())).await {
                Err(_) => {
                    self.health.record_failure(&name);
                    warn!(source = %name, kind = %kind, key, "소스 타임아웃");
                    last_error = Some(SourceError::Timeout(format!(
                        "{:?} elapsed",
                        self.attempt_timeout
                    )));
                }
                Ok(Err(e)) => {
                    self.health.record_failure(&name);
                    warn!(source = %name, kind = %kind, key, error = %e, "소스 실패");
                    last_error = Some(e);
                }
                Ok(Ok(value)) => match validate(&value) {
                    Err(e) => {
                        // 검증 거부 = 소스 실패. 절대 캐시하지 않는다.
                        self.health.record_failure(&name);
                        warn!(source = %name, kind = %kind, key, error = %e, "검증 거부");
                        last_error = Some(e);
                    }
                    Ok(()) => {
                        self.health.record_success(&name, started.elapsed());
                        self.cache.put(kind, key, &name, &value).await;
                        return FeedResponse::Data(Sourced::live(value, name));
                    }
                },
            }
        }

        // 모든 소스 소진: 종류별 최대 나이 이내의 캐시로 대체
        if let Some(cached) = self.cache.get_fresh::<T>(kind, key) {
            info!(
                kind = %kind,
                key,
                age_ms = cached.meta.age_ms,
                "모든 소스 실패, 캐시 값 반환"
            );
            return FeedResponse::Data(cached);
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no source attempted".to_string());
        FeedResponse::Unavailable(Unavailable {
            data_kind: kind.to_string(),
            request_key: key.to_string(),
            reason,
        })
    }

    /// 이번 호출의 시도 순서: 선호 소스 먼저, 그다음 순위 순서.
    fn attempt_order(&self) -> Vec<Arc<dyn MarketSource>> {
        let preferred = self
            .preferred
            .load(Ordering::Relaxed)
            .min(self.sources.len().saturating_sub(1));

        let mut order = Vec::with_capacity(self.sources.len());
        if let Some(source) = self.sources.get(preferred) {
            order.push(source.clone());
        }
        for (idx, source) in self.sources.iter().enumerate() {
            if idx != preferred {
                order.push(source.clone());
            }
        }
        order
    }

    // === 헬스 틱 ===

    /// 모든 소스를 ping하고, 현재 선호 소스가 unhealthy면 순위가 가장
    /// 높은 healthy 소스로 선호를 승격합니다.
    ///
    /// 정상 상태의 호출이 이미 죽은 것으로 알려진 첫 시도 비용을
    /// 반복해서 내지 않게 합니다.
    pub async fn health_tick(&self) {
        for source in &self.sources {
            let name = source.name().to_string();
            let started = Instant::now();
            match tokio::time::timeout(self.attempt_timeout, source.ping()).await {
                Ok(Ok(())) => self.health.record_success(&name, started.elapsed()),
                Ok(Err(e)) => {
                    debug!(source = %name, error = %e, "헬스 체크 실패");
                    self.health.record_failure(&name);
                }
                Err(_) => {
                    debug!(source = %name, "헬스 체크 타임아웃");
                    self.health.record_failure(&name);
                }
            }
        }
        self.promote_preferred();
    }

    /// 선호 소스 승격 로직.
    fn promote_preferred(&self) {
        if self.sources.is_empty() {
            return;
        }
        let snapshot = self.health.snapshot();
        let healthy = |name: &str| {
            snapshot
                .iter()
                .find(|s| s.source == name)
                .map(|s| s.healthy)
                .unwrap_or(true)
        };

        let current = self
            .preferred
            .load(Ordering::Relaxed)
            .min(self.sources.len().saturating_sub(1));

        if healthy(self.sources[current].name()) {
            return;
        }

        if let Some(next) = self
            .sources
            .iter()
            .position(|source| healthy(source.name()))
        {
            if next != current {
                info!(
                    from = self.sources[current].name(),
                    to = self.sources[next].name(),
                    "선호 소스 승격"
                );
                self.preferred.store(next, Ordering::Relaxed);
            }
        }
    }

    /// 주기적 헬스 체크 태스크를 시작합니다.
    pub fn spawn_health_ticker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.health_tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 첫 틱은 즉시 발화하므로 건너뛴다
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.health_tick().await;
            }
        })
    }
}
