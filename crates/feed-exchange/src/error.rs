//! 소스(거래소) 에러 타입.

use thiserror::Error;

/// 소스 하나를 상대로 한 작업의 에러.
///
/// 시장 데이터 읽기 경로에서는 어떤 변종이든 "이 소스 실패"로 취급되어
/// 다음 순위 소스로 넘어갑니다. 호출자에게는 모든 소스와 캐시가 소진된
/// 경우에만 unavailable 결과가 보입니다.
#[derive(Debug, Error)]
pub enum SourceError {
    /// 소켓/네트워크 실패
    #[error("Transport error: {0}")]
    Transport(String),

    /// 제한 시간 초과
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 응답은 왔지만 형식이 어긋남
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 거래소 API 에러 코드
    #[error("API error {code}: {message}")]
    Api { code: i32, message: String },

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 인증/권한 에러
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 파싱은 됐지만 타당성 검사 실패
    #[error("Validation error: {0}")]
    Validation(String),

    /// 모든 소스와 캐시 소진
    #[error("All sources exhausted: {0}")]
    Exhausted(String),

    /// 지원되지 않는 작업
    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// 소스 작업을 위한 Result 타입.
pub type SourceResult<T> = Result<T, SourceError>;

impl SourceError {
    /// 같은 소스로 재시도해 볼 만한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Transport(_)
                | SourceError::Timeout(_)
                | SourceError::RateLimited
        )
    }

    /// 재시도해도 소용없는 치명적 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SourceError::Unauthorized(_) | SourceError::NotSupported(_)
        )
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::Protocol(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Protocol(err.to_string())
    }
}

impl From<feed_data::ValidationError> for SourceError {
    fn from(err: feed_data::ValidationError) -> Self {
        SourceError::Validation(err.0)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SourceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SourceError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SourceError::Transport("reset".to_string()).is_retryable());
        assert!(SourceError::Timeout("2.5s".to_string()).is_retryable());
        assert!(SourceError::RateLimited.is_retryable());
        assert!(!SourceError::Unauthorized("bad key".to_string()).is_retryable());
        assert!(!SourceError::Validation("price <= 0".to_string()).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SourceError::Unauthorized("bad key".to_string()).is_fatal());
        assert!(!SourceError::Transport("reset".to_string()).is_fatal());
    }
}
