//! 재연결 백오프.

use feed_core::StreamConfig;
use std::time::Duration;

/// 지수 백오프. 연속 실패마다 배수로 늘고, 성공 시 시작값으로 복귀합니다.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: f64,
    factor: f64,
    cap_ms: f64,
    current_ms: f64,
}

impl Backoff {
    /// 새 백오프를 생성합니다.
    pub fn new(base_ms: f64, factor: f64, cap_ms: f64) -> Self {
        Self {
            base_ms,
            factor,
            cap_ms,
            current_ms: base_ms,
        }
    }

    /// 설정에서 생성합니다.
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.backoff_base_ms,
            config.backoff_factor,
            config.backoff_cap_ms,
        )
    }

    /// 이번 재시도에 쓸 지연을 반환하고 다음 값으로 진행합니다.
    pub fn next_delay(&mut self) -> Duration {
        let delay_ms = self.current_ms.min(self.cap_ms);
        self.current_ms = (self.current_ms * self.factor).min(self.cap_ms);
        Duration::from_secs_f64(delay_ms / 1000.0)
    }

    /// 다음에 반환될 지연(밀리초)을 들여다봅니다.
    pub fn peek_ms(&self) -> f64 {
        self.current_ms.min(self.cap_ms)
    }

    /// 성공 시 시작값으로 되돌립니다.
    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
    }
}
