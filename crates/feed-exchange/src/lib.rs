//! 거래소 연결 및 페일오버 계층.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - MarketSource trait: 거래소별 REST 어댑터 인터페이스
//! - Binance / OKX / Bybit 어댑터 (REST + WebSocket wire)
//! - HealthRegistry: 소스별 헬스 추적과 쿨다운 재탐색
//! - StreamManager: 소켓 하나로 멀티플렉싱하는 스트림 매니저
//! - FailoverRouter: 순위 소스 페일오버 + 캐시 대체
//! - AccountClient: 페일오버 없는 계좌/주문 클라이언트

pub mod account;
pub mod connector;
pub mod error;
pub mod failover;
pub mod health;
pub mod stream;
pub mod traits;

pub use account::{
    AccountClient, AccountSnapshot, AccountVenue, Balance, BinanceAccount, OpenOrder,
    OrderRequest, OrderType, Side,
};
pub use connector::{
    build_sources, BinanceConfig, BinanceSource, BinanceWire, BybitConfig, BybitSource,
    BybitWire, OkxConfig, OkxSource, OkxWire,
};
pub use error::{SourceError, SourceResult};
pub use failover::FailoverRouter;
pub use health::{HealthConfig, HealthRegistry, HealthSnapshot};
pub use stream::{
    Backoff, ConnectionStatus, EventBus, SimRemote, SimWsConnector, StatusBus, StreamChannel,
    StreamHandler, StreamKey, StreamManager, SubscriptionGuard, TungsteniteConnector,
    WsConnector, WsFrame, WsTransport,
};
pub use traits::{
    KeepAlive, MarketSource, Protocols, SourceDescriptor, SourceWire, StreamEvent,
};
