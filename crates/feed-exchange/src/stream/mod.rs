//! 스트리밍 연결 계층.
//!
//! 활성 구독 집합 하나당 소켓 하나를 유지하는 멀티플렉싱 매니저와
//! 그 부품들(스트림 키, 상태 버스, 백오프, transport 추상화)을
//! 제공합니다.

mod backoff;
mod key;
mod manager;
mod status;
mod transport;

pub use backoff::Backoff;
pub use key::{StreamChannel, StreamKey};
pub use manager::{StreamHandler, StreamManager, SubscriptionGuard};
pub use status::{BusSubscription, ConnectionStatus, EventBus, StatusBus};
pub use transport::{
    SimRemote, SimWsConnector, TungsteniteConnector, WsConnector, WsFrame, WsTransport,
};
