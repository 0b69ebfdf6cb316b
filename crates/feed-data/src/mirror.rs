//! 캐시 미러 저장소.
//!
//! 프로세스 재시작 후에도 마지막 성공 값을 잃지 않도록 캐시 내용을
//! 미러링합니다. 미러 쓰기는 best-effort입니다. 쓰기 실패(디스크 부족,
//! 권한 등)는 경고 로그만 남기고 절대 위로 전파하지 않습니다.

use crate::error::DataError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

/// 미러에 저장되는 엔트리 하나.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorEntry {
    /// 데이터 종류 (예: "ticker")
    pub kind: String,
    /// 요청 키
    pub key: String,
    /// 값을 제공한 소스
    pub source: String,
    /// 받아온 시각
    pub fetched_at: DateTime<Utc>,
    /// 직렬화된 값
    pub payload: serde_json::Value,
}

/// 전체 캐시의 미러 스냅샷.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorSnapshot {
    /// 저장된 엔트리
    pub entries: Vec<MirrorEntry>,
}

/// 미러 저장소 인터페이스.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// 저장된 스냅샷을 읽습니다. 없거나 깨졌으면 None.
    async fn load(&self) -> Option<MirrorSnapshot>;

    /// 스냅샷을 저장합니다.
    async fn save(&self, snapshot: &MirrorSnapshot) -> Result<(), DataError>;
}

/// JSON 파일 기반 미러.
pub struct JsonFileMirror {
    path: PathBuf,
}

impl JsonFileMirror {
    /// 지정한 경로를 사용하는 파일 미러를 생성합니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MirrorStore for JsonFileMirror {
    async fn load(&self) -> Option<MirrorSnapshot> {
        let text = tokio::fs::read_to_string(&self.path).await.ok()?;
        match serde_json::from_str(&text) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "미러 파일 파싱 실패, 무시");
                None
            }
        }
    }

    async fn save(&self, snapshot: &MirrorSnapshot) -> Result<(), DataError> {
        let text = serde_json::to_string(snapshot)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // 임시 파일에 쓰고 교체 - 중간에 죽어도 기존 미러는 보존
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// 메모리 미러 (테스트용).
#[derive(Default)]
pub struct MemoryMirror {
    slot: Mutex<Option<String>>,
}

impl MemoryMirror {
    /// 빈 메모리 미러를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for MemoryMirror {
    async fn load(&self) -> Option<MirrorSnapshot> {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .and_then(|text| serde_json::from_str(text).ok())
    }

    async fn save(&self, snapshot: &MirrorSnapshot) -> Result<(), DataError> {
        let text = serde_json::to_string(snapshot)?;
        *self.slot.lock().await = Some(text);
        Ok(())
    }
}
