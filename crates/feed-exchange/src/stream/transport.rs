//! WebSocket transport 추상화.
//!
//! 스트림 매니저가 tokio-tungstenite에 직접 묶이지 않도록 연결 계층을
//! trait 뒤로 분리합니다. 테스트에서는 네트워크 대신 스크립트로 동작하는
//! `SimWsConnector`를 사용합니다.

use crate::error::{SourceError, SourceResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::debug;

/// 수신 WebSocket 프레임.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    /// 텍스트 메시지
    Text(String),
    /// Ping (응답은 transport/매니저가 처리)
    Ping(Vec<u8>),
    /// Pong
    Pong(Vec<u8>),
    /// 원격이 닫음
    Close,
}

/// 열린 WebSocket 연결.
#[async_trait]
pub trait WsTransport: Send {
    /// 텍스트 프레임을 전송합니다.
    async fn send_text(&mut self, text: String) -> SourceResult<()>;

    /// 다음 프레임을 수신합니다. None이면 연결이 끊긴 것입니다.
    async fn next_frame(&mut self) -> Option<SourceResult<WsFrame>>;

    /// 연결을 best-effort로 닫습니다.
    async fn close(&mut self);
}

/// WebSocket 연결 생성기.
#[async_trait]
pub trait WsConnector: Send + Sync {
    /// URL로 연결합니다.
    async fn connect(&self, url: &str) -> SourceResult<Box<dyn WsTransport>>;
}

// ============================================================================
// tokio-tungstenite 구현
// ============================================================================

/// 실제 네트워크 연결용 connector.
#[derive(Debug, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// 새 connector를 생성합니다.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> SourceResult<Box<dyn WsTransport>> {
        let (ws, _) = connect_async(url).await?;
        Ok(Box::new(TungsteniteTransport { inner: ws }))
    }
}

struct TungsteniteTransport {
    inner: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl WsTransport for TungsteniteTransport {
    async fn send_text(&mut self, text: String) -> SourceResult<()> {
        self.inner.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<SourceResult<WsFrame>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(WsFrame::Text(text.to_string()))),
                Ok(Message::Ping(data)) => {
                    // 즉시 pong 응답
                    if let Err(e) = self.inner.send(Message::Pong(data.clone())).await {
                        return Some(Err(e.into()));
                    }
                    return Some(Ok(WsFrame::Ping(data.to_vec())));
                }
                Ok(Message::Pong(data)) => return Some(Ok(WsFrame::Pong(data.to_vec()))),
                Ok(Message::Close(_)) => return Some(Ok(WsFrame::Close)),
                Ok(_) => continue, // binary/frame은 이 피드에서 쓰지 않음
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}

// ============================================================================
// 시뮬레이션 구현 (테스트용)
// ============================================================================

/// URL별 시뮬레이션 동작.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimBehavior {
    /// 연결 거부
    Refuse,
    /// 연결 수락
    Accept,
}

/// 스크립트로 동작하는 시뮬레이션 connector.
///
/// URL별로 수락/거부를 설정하고, 수락된 연결에는 `SimRemote`를 통해
/// 원격(서버) 역할로 프레임을 밀어 넣거나 전송된 프레임을 검사할 수
/// 있습니다.
#[derive(Default)]
pub struct SimWsConnector {
    behaviors: Mutex<HashMap<String, SimBehavior>>,
    remotes: Mutex<Vec<(String, SimRemote)>>,
}

impl SimWsConnector {
    /// 새 시뮬레이션 connector를 생성합니다. 설정되지 않은 URL은 거부합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 이 URL로의 연결을 수락하도록 설정합니다.
    pub fn accept(&self, url: &str) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), SimBehavior::Accept);
    }

    /// 이 URL로의 연결을 거부하도록 설정합니다.
    pub fn refuse(&self, url: &str) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), SimBehavior::Refuse);
    }

    /// 이 URL로 생성된 연결 수를 반환합니다.
    pub fn connection_count(&self, url: &str) -> usize {
        self.remotes
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    /// 이 URL의 가장 최근 연결에 대한 원격 핸들을 반환합니다.
    pub fn last_remote(&self, url: &str) -> Option<SimRemote> {
        self.remotes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .map(|(_, remote)| remote.clone())
    }
}

#[async_trait]
impl WsConnector for SimWsConnector {
    async fn connect(&self, url: &str) -> SourceResult<Box<dyn WsTransport>> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(SimBehavior::Refuse);

        match behavior {
            SimBehavior::Refuse => {
                debug!(url, "sim: connection refused");
                Err(SourceError::Transport(format!("sim refused: {}", url)))
            }
            SimBehavior::Accept => {
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let sent = Arc::new(Mutex::new(Vec::new()));
                let remote = SimRemote {
                    inbound_tx,
                    sent: sent.clone(),
                };
                self.remotes
                    .lock()
                    .unwrap()
                    .push((url.to_string(), remote));

                Ok(Box::new(SimTransport {
                    inbound_rx,
                    sent,
                    closed: false,
                }))
            }
        }
    }
}

/// 시뮬레이션 연결의 원격(서버) 핸들.
#[derive(Clone)]
pub struct SimRemote {
    inbound_tx: mpsc::UnboundedSender<SourceResult<WsFrame>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl SimRemote {
    /// 서버가 텍스트 프레임을 보냅니다.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound_tx.send(Ok(WsFrame::Text(text.into())));
    }

    /// 서버가 연결을 닫습니다.
    pub fn push_close(&self) {
        let _ = self.inbound_tx.send(Ok(WsFrame::Close));
    }

    /// transport 에러를 발생시킵니다.
    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self
            .inbound_tx
            .send(Err(SourceError::Transport(message.into())));
    }

    /// 클라이언트가 지금까지 전송한 텍스트 프레임.
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

struct SimTransport {
    inbound_rx: mpsc::UnboundedReceiver<SourceResult<WsFrame>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

#[async_trait]
impl WsTransport for SimTransport {
    async fn send_text(&mut self, text: String) -> SourceResult<()> {
        if self.closed {
            return Err(SourceError::Transport("sim transport closed".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<SourceResult<WsFrame>> {
        if self.closed {
            return None;
        }
        self.inbound_rx.recv().await
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sim_connector_refuses_unknown_url() {
        let connector = SimWsConnector::new();
        assert!(connector.connect("wss://unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_sim_transport_roundtrip() {
        let connector = SimWsConnector::new();
        connector.accept("wss://test");

        let mut transport = connector.connect("wss://test").await.unwrap();
        transport.send_text("hello".to_string()).await.unwrap();

        let remote = connector.last_remote("wss://test").unwrap();
        assert_eq!(remote.sent_frames(), vec!["hello"]);

        remote.push_text("world");
        let frame = transport.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, WsFrame::Text("world".to_string()));

        remote.push_close();
        let frame = transport.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, WsFrame::Close);
    }
}
