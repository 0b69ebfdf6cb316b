//! 데이터 계층 에러 타입.

use thiserror::Error;

/// 캐시/미러 에러.
#[derive(Debug, Error)]
pub enum DataError {
    /// 직렬화 에러
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 파일 IO 에러
    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        DataError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::Io(err.to_string())
    }
}

/// 타당성 검사 실패.
///
/// 검증 실패는 소스 실패와 동일하게 취급됩니다. 해당 값은 절대
/// 캐시되지 않고, 페일오버는 다음 소스로 넘어갑니다.
#[derive(Debug, Clone, Error)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);
