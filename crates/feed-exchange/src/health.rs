//! 소스 헬스 추적.
//!
//! 소스별 healthy ⇄ unhealthy 상태를 추적합니다.
//!
//! # 상태 전이
//!
//! ```text
//! healthy ──[연속 실패 N회]──> unhealthy
//!    ↑                            │
//!    │                  [쿨다운 경과: 재탐색 허용]
//!    │                            │
//!    └──[성공 1회 / 수동 reset]───┘
//! ```
//!
//! unhealthy인 소스는 쿨다운이 지나기 전까지 페일오버 순회에서
//! 제외됩니다. 수동 reset은 쿨다운과 무관하게 즉시 복구시킵니다
//! (예: 사용자가 VPN을 켠 뒤 재시도).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 헬스 추적 설정.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// 연속 실패 임계치
    pub unhealthy_threshold: u32,
    /// unhealthy 상태에서 재탐색까지의 쿨다운
    pub cooldown: Duration,
    /// 지연 시간 EWMA 가중치 (0.0 ~ 1.0)
    pub latency_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 4,
            cooldown: Duration::from_secs(300), // 5분
            latency_alpha: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
struct HealthRecord {
    consecutive_errors: u32,
    healthy: bool,
    unhealthy_since: Option<Instant>,
    last_success: Option<Instant>,
    avg_latency_ms: Option<f64>,
    total_successes: u64,
    total_failures: u64,
}

impl HealthRecord {
    fn new() -> Self {
        Self {
            consecutive_errors: 0,
            healthy: true,
            unhealthy_since: None,
            last_success: None,
            avg_latency_ms: None,
            total_successes: 0,
            total_failures: 0,
        }
    }
}

/// 소스 하나의 헬스 스냅샷 (진단/표시용).
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// 소스 이름
    pub source: String,
    /// 현재 healthy 여부 (쿨다운 경과 반영)
    pub healthy: bool,
    /// 연속 실패 횟수
    pub consecutive_errors: u32,
    /// 마지막 성공 후 경과 시간
    pub since_last_success: Option<Duration>,
    /// 평균 지연 시간 (밀리초, EWMA)
    pub avg_latency_ms: Option<f64>,
    /// 누적 성공 횟수
    pub total_successes: u64,
    /// 누적 실패 횟수
    pub total_failures: u64,
}

/// 고정 소스 집합의 헬스 레지스트리.
///
/// 프로세스 시작 시 한 번 생성되어 프로세스와 수명을 같이합니다.
pub struct HealthRegistry {
    config: HealthConfig,
    records: RwLock<HashMap<String, HealthRecord>>,
}

impl HealthRegistry {
    /// 소스 이름 목록으로 레지스트리를 생성합니다.
    pub fn new(sources: impl IntoIterator<Item = String>, config: HealthConfig) -> Self {
        let records = sources
            .into_iter()
            .map(|name| (name, HealthRecord::new()))
            .collect();
        Self {
            config,
            records: RwLock::new(records),
        }
    }

    /// 성공 기록. 에러 카운트를 즉시 리셋하고 healthy로 되돌립니다.
    pub fn record_success(&self, source: &str, latency: Duration) {
        let mut records = self.records.write().unwrap();
        let Some(record) = records.get_mut(source) else {
            return;
        };

        if !record.healthy {
            info!(source, "소스 복구됨: unhealthy -> healthy");
        }

        record.consecutive_errors = 0;
        record.healthy = true;
        record.unhealthy_since = None;
        record.last_success = Some(Instant::now());
        record.total_successes += 1;

        let latency_ms = latency.as_secs_f64() * 1000.0;
        record.avg_latency_ms = Some(match record.avg_latency_ms {
            Some(avg) => avg + self.config.latency_alpha * (latency_ms - avg),
            None => latency_ms,
        });
    }

    /// 실패 기록. 연속 실패가 임계치에 도달하면 unhealthy로 전이합니다.
    pub fn record_failure(&self, source: &str) {
        let mut records = self.records.write().unwrap();
        let Some(record) = records.get_mut(source) else {
            return;
        };

        record.consecutive_errors += 1;
        record.total_failures += 1;

        if record.healthy && record.consecutive_errors >= self.config.unhealthy_threshold {
            record.healthy = false;
            record.unhealthy_since = Some(Instant::now());
            warn!(
                source,
                consecutive_errors = record.consecutive_errors,
                "소스 unhealthy로 전환"
            );
        }
    }

    /// 이 소스를 지금 시도해도 되는지 확인합니다.
    ///
    /// healthy이거나, unhealthy라도 쿨다운이 지났으면 true (재탐색 허용).
    pub fn is_available(&self, source: &str) -> bool {
        let mut records = self.records.write().unwrap();
        let Some(record) = records.get_mut(source) else {
            // 모르는 소스는 막지 않는다
            return true;
        };

        if record.healthy {
            return true;
        }

        if let Some(since) = record.unhealthy_since {
            if since.elapsed() >= self.config.cooldown {
                // 쿨다운 경과: healthy로 되돌려 재탐색시킨다.
                // 실패하면 임계치 도달 시 다시 unhealthy가 된다.
                info!(source, "쿨다운 경과, 소스 재탐색 허용");
                record.healthy = true;
                record.unhealthy_since = None;
                record.consecutive_errors = 0;
                return true;
            }
        }

        false
    }

    /// 단일 소스를 수동 리셋합니다. 쿨다운과 무관하게 즉시 복구됩니다.
    pub fn reset(&self, source: &str) {
        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get_mut(source) {
            record.consecutive_errors = 0;
            record.healthy = true;
            record.unhealthy_since = None;
            info!(source, "소스 헬스 수동 리셋");
        }
    }

    /// 모든 소스를 수동 리셋합니다.
    pub fn reset_all(&self) {
        let mut records = self.records.write().unwrap();
        for (source, record) in records.iter_mut() {
            record.consecutive_errors = 0;
            record.healthy = true;
            record.unhealthy_since = None;
            info!(source, "소스 헬스 수동 리셋");
        }
    }

    /// 전체 소스의 헬스 스냅샷을 반환합니다.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let records = self.records.read().unwrap();
        let mut snapshots: Vec<HealthSnapshot> = records
            .iter()
            .map(|(source, record)| {
                // 스냅샷은 읽기 전용이라 쿨다운 경과를 상태 변경 없이 반영
                let cooled_down = record
                    .unhealthy_since
                    .map(|since| since.elapsed() >= self.config.cooldown)
                    .unwrap_or(false);
                HealthSnapshot {
                    source: source.clone(),
                    healthy: record.healthy || cooled_down,
                    consecutive_errors: record.consecutive_errors,
                    since_last_success: record.last_success.map(|at| at.elapsed()),
                    avg_latency_ms: record.avg_latency_ms,
                    total_successes: record.total_successes,
                    total_failures: record.total_failures,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.source.cmp(&b.source));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn registry(threshold: u32, cooldown_ms: u64) -> HealthRegistry {
        HealthRegistry::new(
            ["binance".to_string(), "okx".to_string()],
            HealthConfig {
                unhealthy_threshold: threshold,
                cooldown: Duration::from_millis(cooldown_ms),
                latency_alpha: 0.2,
            },
        )
    }

    #[test]
    fn test_initially_available() {
        let registry = registry(3, 300_000);
        assert!(registry.is_available("binance"));
        assert!(registry.is_available("okx"));
    }

    #[test]
    fn test_unhealthy_after_threshold() {
        let registry = registry(3, 300_000);

        registry.record_failure("binance");
        registry.record_failure("binance");
        assert!(registry.is_available("binance"));

        registry.record_failure("binance");
        assert!(!registry.is_available("binance"));
        // 다른 소스는 영향 없음
        assert!(registry.is_available("okx"));
    }

    #[test]
    fn test_success_resets_error_count() {
        let registry = registry(3, 300_000);

        registry.record_failure("binance");
        registry.record_failure("binance");
        registry.record_success("binance", Duration::from_millis(50));

        registry.record_failure("binance");
        registry.record_failure("binance");
        assert!(registry.is_available("binance"));
    }

    #[test]
    fn test_cooldown_reopens_source() {
        let registry = registry(1, 50);

        registry.record_failure("binance");
        assert!(!registry.is_available("binance"));

        thread::sleep(Duration::from_millis(60));
        assert!(registry.is_available("binance"));
    }

    #[test]
    fn test_manual_reset_ignores_cooldown() {
        let registry = registry(1, 300_000);

        registry.record_failure("binance");
        registry.record_failure("okx");
        assert!(!registry.is_available("binance"));
        assert!(!registry.is_available("okx"));

        registry.reset("binance");
        assert!(registry.is_available("binance"));
        assert!(!registry.is_available("okx"));

        registry.reset_all();
        assert!(registry.is_available("okx"));
    }

    #[test]
    fn test_latency_ewma() {
        let registry = registry(3, 300_000);

        registry.record_success("binance", Duration::from_millis(100));
        registry.record_success("binance", Duration::from_millis(200));

        let snapshot = registry.snapshot();
        let binance = snapshot.iter().find(|s| s.source == "binance").unwrap();
        // 100 + 0.2 * (200 - 100) = 120
        assert_eq!(binance.avg_latency_ms, Some(120.0));
        assert_eq!(binance.total_successes, 2);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let registry = registry(1, 300_000);
        registry.record_failure("okx");

        let snapshot = registry.snapshot();
        let okx = snapshot.iter().find(|s| s.source == "okx").unwrap();
        assert!(!okx.healthy);
        assert_eq!(okx.total_failures, 1);
    }
}
