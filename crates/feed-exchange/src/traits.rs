//! 소스(거래소) trait 정의.
//!
//! REST 쪽(`MarketSource`)과 WebSocket 쪽(`SourceWire`)을 분리합니다.
//! 페일오버 라우터는 `MarketSource`의 순위 목록을, 스트림 매니저는
//! 각 소스의 `SourceWire`를 사용합니다.

use crate::error::SourceResult;
use crate::stream::StreamKey;
use async_trait::async_trait;
use feed_core::{DepthUpdate, FundingRate, Kline, MarkPrice, OrderBook, Symbol, Ticker, Timeframe};
use std::sync::Arc;
use std::time::Duration;

/// 소스의 정적 속성.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    /// 소스 이름 (예: "binance")
    pub name: String,
    /// 우선순위 (낮을수록 선호)
    pub rank: u32,
    /// 지원 프로토콜
    pub protocols: Protocols,
}

/// 소스가 지원하는 프로토콜.
#[derive(Debug, Clone, Copy)]
pub struct Protocols {
    /// REST 지원 여부
    pub rest: bool,
    /// WebSocket 지원 여부
    pub ws: bool,
}

impl Protocols {
    /// REST와 WS를 모두 지원.
    pub fn both() -> Self {
        Self { rest: true, ws: true }
    }
}

/// 시장 데이터 REST 인터페이스.
///
/// 구현체는 자기 거래소의 필드명/단위/심볼 표기를 canonical 타입으로
/// 변환해야 하며, 빠진 변동 필드는 직접 계산해서 채워야 합니다.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// 소스 속성 반환.
    fn descriptor(&self) -> &SourceDescriptor;

    /// 소스 이름 반환.
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// 가벼운 연결 확인 (헬스 체크용).
    async fn ping(&self) -> SourceResult<()>;

    /// 24시간 시세 조회.
    async fn ticker(&self, symbol: &Symbol) -> SourceResult<Ticker>;

    /// 캔들 조회. 과거 → 최신 순으로 정렬해 반환합니다.
    async fn klines(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        limit: u32,
    ) -> SourceResult<Vec<Kline>>;

    /// 호가창 스냅샷 조회.
    async fn depth(&self, symbol: &Symbol, limit: u32) -> SourceResult<OrderBook>;

    /// 펀딩 비율 조회.
    async fn funding_rate(&self, symbol: &Symbol) -> SourceResult<FundingRate>;

    /// 마크 가격 조회.
    async fn mark_price(&self, symbol: &Symbol) -> SourceResult<MarkPrice>;

    /// 이 소스의 WebSocket wire 어댑터. WS 미지원이면 None.
    fn wire(&self) -> Option<Arc<dyn SourceWire>>;
}

/// 정규화된 스트림 이벤트.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// 시세 업데이트
    Ticker(Ticker),
    /// 캔들 업데이트
    Kline(Kline),
    /// 호가창 증분 업데이트
    Depth(DepthUpdate),
}

/// 소스별 keep-alive 규칙.
#[derive(Debug, Clone)]
pub enum KeepAlive {
    /// 필요 없음 (서버 ping에 대한 pong은 transport가 처리)
    None,
    /// 주기적으로 텍스트 프레임 전송 (OKX "ping", Bybit {"op":"ping"})
    Text {
        /// 보낼 페이로드
        payload: String,
        /// 전송 간격
        interval: Duration,
    },
}

/// 소스별 WebSocket wire 어댑터.
///
/// 연결 URL, 구독 프레임 형식, keep-alive 규칙, 수신 메시지 파싱이
/// 거래소마다 다릅니다. 파싱 불가능하거나 무관한 메시지는 None으로
/// 조용히 버립니다.
pub trait SourceWire: Send + Sync {
    /// 소스 이름 반환.
    fn name(&self) -> &str;

    /// WebSocket 연결 URL.
    fn ws_url(&self) -> String;

    /// 연결 직후 보낼 구독 프레임. 스트림 키 집합 전체를 인코딩합니다.
    fn subscribe_frames(&self, keys: &[StreamKey]) -> Vec<String>;

    /// keep-alive 규칙.
    fn keepalive(&self) -> KeepAlive;

    /// 수신 텍스트 메시지를 canonical 이벤트로 변환합니다.
    ///
    /// 반환된 `StreamKey`는 어느 구독에 전달할지 매칭하는 데 쓰입니다.
    fn parse_message(&self, text: &str) -> Option<(StreamKey, StreamEvent)>;
}
