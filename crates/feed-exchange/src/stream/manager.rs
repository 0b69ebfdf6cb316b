//! 스트림 연결 매니저.
//!
//! 구독 집합 하나당 소켓 하나를 유지하면서, 현재 도달 가능한 최상위
//! 소스에서 모든 구독 스트림을 받아옵니다.
//!
//! # 상태 전이
//!
//! ```text
//! disconnected ── subscribe ──> connecting ──> connected
//!        ↑                          │  ↑           │
//!        │            [핸드셰이크 실패: 다음 소스]  │
//!        │                          │  │    [예기치 않은 끊김]
//!   [구독 전부 해제]                │  └── reconnecting (백오프)
//!        │                          ↓
//!        └────────────── unavailable (모든 소스 실패, reset 전까지 유지)
//! ```
//!
//! 구독 집합이 바뀌면 wire 구독 집합도 바뀌어야 하므로, 새 합집합으로
//! 닫고 다시 여는 재협상을 수행합니다.

use crate::stream::backoff::Backoff;
use crate::stream::key::StreamKey;
use crate::stream::status::{BusSubscription, ConnectionStatus, StatusBus};
use crate::stream::transport::{WsConnector, WsFrame, WsTransport};
use crate::traits::{KeepAlive, SourceWire, StreamEvent};
use feed_core::StreamConfig;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// 스트림 이벤트 핸들러.
pub type StreamHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

enum Command {
    Renegotiate,
    Reset,
    Shutdown,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subs: HashMap<StreamKey, HashMap<u64, StreamHandler>>,
}

impl Registry {
    fn add(&mut self, key: StreamKey, handler: StreamHandler) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.subs.entry(key).or_default().insert(id, handler);
        id
    }

    fn remove(&mut self, key: &StreamKey, id: u64) {
        if let Some(handlers) = self.subs.get_mut(key) {
            handlers.remove(&id);
            if handlers.is_empty() {
                self.subs.remove(key);
            }
        }
    }

    fn keys(&self) -> Vec<StreamKey> {
        self.subs.keys().cloned().collect()
    }

    fn handlers_for(&self, incoming: &StreamKey) -> Vec<StreamHandler> {
        self.subs
            .iter()
            .filter(|(key, _)| key.matches(incoming))
            .flat_map(|(_, handlers)| handlers.values().cloned())
            .collect()
    }
}

/// 구독 해제 가드. 드롭하거나 `unsubscribe()`를 호출하면 핸들러가
/// 제거되고, 남은 핸들러가 없는 스트림은 다음 재협상에서 wire 구독도
/// 취소됩니다.
pub struct SubscriptionGuard {
    registry: Arc<RwLock<Registry>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    key: StreamKey,
    id: u64,
    active: bool,
}

impl SubscriptionGuard {
    /// 명시적으로 구독을 해제합니다.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.registry.write().unwrap().remove(&self.key, self.id);
        let _ = self.cmd_tx.send(Command::Renegotiate);
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// 멀티플렉싱 스트림 연결 매니저.
pub struct StreamManager {
    registry: Arc<RwLock<Registry>>,
    status: Arc<StatusBus>,
    current_source: Arc<RwLock<Option<String>>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StreamManager {
    /// 순위 순서의 wire 어댑터 목록으로 매니저를 생성합니다.
    pub fn new(
        wires: Vec<Arc<dyn SourceWire>>,
        connector: Arc<dyn WsConnector>,
        config: StreamConfig,
    ) -> Self {
        let registry = Arc::new(RwLock::new(Registry::default()));
        let status = Arc::new(StatusBus::new());
        let current_source = Arc::new(RwLock::new(None));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_loop(
            wires,
            connector,
            config,
            registry.clone(),
            status.clone(),
            current_source.clone(),
            cmd_rx,
        ));

        Self {
            registry,
            status,
            current_source,
            cmd_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// 스트림을 구독합니다.
    ///
    /// 첫 구독이면 연결을 열고, 이미 열려 있으면 새 합집합으로
    /// 재협상합니다. 같은 키에 여러 핸들러를 등록할 수 있으며, 모두
    /// 동일한 정규화 페이로드를 받습니다.
    pub fn subscribe(&self, key: StreamKey, handler: StreamHandler) -> SubscriptionGuard {
        let id = self.registry.write().unwrap().add(key.clone(), handler);
        let _ = self.cmd_tx.send(Command::Renegotiate);

        SubscriptionGuard {
            registry: self.registry.clone(),
            cmd_tx: self.cmd_tx.clone(),
            key,
            id,
            active: true,
        }
    }

    /// 상태 변경을 구독합니다. 등록 즉시 현재 상태로 호출됩니다.
    pub fn on_status_change(
        &self,
        callback: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> BusSubscription<ConnectionStatus> {
        self.status.subscribe(callback)
    }

    /// 현재 연결 상태를 반환합니다.
    pub fn status(&self) -> ConnectionStatus {
        self.status.current()
    }

    /// 현재 연결된 소스 이름을 반환합니다.
    pub fn current_source(&self) -> Option<String> {
        self.current_source.read().unwrap().clone()
    }

    /// 세션 실패 기록을 지우고 최상위 소스부터 다시 시작합니다.
    ///
    /// `unavailable` 상태에서 빠져나오는 유일한 경로입니다 (예: 사용자가
    /// VPN을 켠 뒤 수동 재시도).
    pub fn reset(&self) {
        let _ = self.cmd_tx.send(Command::Reset);
    }

    /// 매니저를 종료합니다. 타이머와 상태를 정리하고 소켓을 best-effort로
    /// 닫습니다.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

fn snapshot_keys(registry: &Arc<RwLock<Registry>>) -> Vec<StreamKey> {
    registry.read().unwrap().keys()
}

fn dispatch(registry: &Arc<RwLock<Registry>>, incoming: &StreamKey, event: &StreamEvent) {
    // 핸들러는 락 밖에서 호출 (핸들러 안에서 구독 변경 가능)
    let handlers = registry.read().unwrap().handlers_for(incoming);
    for handler in handlers {
        handler(event);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    wires: Vec<Arc<dyn SourceWire>>,
    connector: Arc<dyn WsConnector>,
    config: StreamConfig,
    registry: Arc<RwLock<Registry>>,
    status: Arc<StatusBus>,
    current_source: Arc<RwLock<Option<String>>>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut backoff = Backoff::from_config(&config);
    let mut failed: HashSet<String> = HashSet::new();

    'outer: loop {
        // 구독이 없으면 끊고 명령 대기
        if snapshot_keys(&registry).is_empty() {
            *current_source.write().unwrap() = None;
            status.set(ConnectionStatus::Disconnected);
            match cmd_rx.recv().await {
                Some(Command::Renegotiate) => continue 'outer,
                Some(Command::Reset) => {
                    failed.clear();
                    backoff.reset();
                    continue 'outer;
                }
                Some(Command::Shutdown) | None => break 'outer,
            }
        }

        // 아직 실패로 표시되지 않은 최상위 소스 선택
        let Some(wire) = wires.iter().find(|w| !failed.contains(w.name())).cloned() else {
            // 모든 소스 실패 - reset 전까지 자동 재시도 없음
            *current_source.write().unwrap() = None;
            status.set(ConnectionStatus::Unavailable);
            warn!("모든 스트리밍 소스 실패, reset 대기");
            loop {
                match cmd_rx.recv().await {
                    Some(Command::Reset) => {
                        failed.clear();
                        backoff.reset();
                        continue 'outer;
                    }
                    Some(Command::Renegotiate) => {} // unavailable 유지
                    Some(Command::Shutdown) | None => break 'outer,
                }
            }
        };

        status.set(ConnectionStatus::Connecting);
        info!(source = wire.name(), "WebSocket 연결 시도");

        let mut transport = match connector.connect(&wire.ws_url()).await {
            Ok(transport) => transport,
            Err(e) => {
                // 첫 핸드셰이크 실패: 이 소스를 세션 실패로 표시하고 즉시 다음 소스
                warn!(source = wire.name(), error = %e, "연결 실패, 다음 소스로 전환");
                failed.insert(wire.name().to_string());
                continue 'outer;
            }
        };

        // 현재 합집합으로 구독 프레임 전송
        let active_keys = snapshot_keys(&registry);
        let mut subscribe_ok = true;
        for frame in wire.subscribe_frames(&active_keys) {
            if let Err(e) = transport.send_text(frame).await {
                warn!(source = wire.name(), error = %e, "구독 전송 실패");
                subscribe_ok = false;
                break;
            }
        }
        if !subscribe_ok {
            failed.insert(wire.name().to_string());
            transport.close().await;
            continue 'outer;
        }

        let active_set: HashSet<StreamKey> = active_keys.iter().cloned().collect();
        *current_source.write().unwrap() = Some(wire.name().to_string());
        status.set(ConnectionStatus::Connected);
        backoff.reset();
        // 연결 성공: 다음 장애 때 다시 최상위부터 순회
        failed.clear();
        info!(
            source = wire.name(),
            streams = active_keys.len(),
            "WebSocket 연결됨"
        );

        // keep-alive가 없는 소스는 하루 한 번 깨어나는 무해한 틱으로 둔다
        let (ka_payload, ka_period) = match wire.keepalive() {
            KeepAlive::Text { payload, interval } => (Some(payload), interval),
            KeepAlive::None => (None, std::time::Duration::from_secs(24 * 60 * 60)),
        };
        let mut ka_interval =
            tokio::time::interval_at(tokio::time::Instant::now() + ka_period, ka_period);
        ka_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // 연결 유지 루프. Some(reason)으로 빠져나오면 예기치 않은 끊김.
        let drop_reason: Option<String> = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Renegotiate) => {
                        let new_keys: HashSet<StreamKey> =
                            snapshot_keys(&registry).into_iter().collect();
                        if new_keys != active_set {
                            // 구독 집합 변경 → 새 합집합으로 닫고 재연결
                            debug!(source = wire.name(), "구독 집합 변경, 재협상");
                            transport.close().await;
                            continue 'outer;
                        }
                    }
                    Some(Command::Reset) => {
                        failed.clear();
                        backoff.reset();
                    }
                    Some(Command::Shutdown) | None => {
                        transport.close().await;
                        break 'outer;
                    }
                },
                _ = ka_interval.tick() => {
                    if let Some(payload) = &ka_payload {
                        if let Err(e) = transport.send_text(payload.clone()).await {
                            break Some(format!("keepalive 전송 실패: {}", e));
                        }
                    }
                }
                frame = transport.next_frame() => match frame {
                    Some(Ok(WsFrame::Text(text))) => {
                        match wire.parse_message(&text) {
                            Some((incoming, event)) => dispatch(&registry, &incoming, &event),
                            // 파싱 불가/무관 메시지는 해당 메시지만 스킵
                            None => trace!(source = wire.name(), "스트림 메시지 무시"),
                        }
                    }
                    Some(Ok(WsFrame::Ping(_))) | Some(Ok(WsFrame::Pong(_))) => {}
                    Some(Ok(WsFrame::Close)) => break Some("원격이 연결을 닫음".to_string()),
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break Some("연결 끊김".to_string()),
                },
            }
        };

        // 여기 도달 = 연결된 상태에서의 예기치 않은 끊김
        if let Some(reason) = drop_reason {
            warn!(source = wire.name(), reason, "WebSocket 연결 끊김, 재연결 예약");
            *current_source.write().unwrap() = None;
            status.set(ConnectionStatus::Reconnecting);
            transport.close().await;

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "재연결 백오프");

            // 재연결 타이머는 연결당 하나. 대기 중의 Renegotiate는 no-op
            // (재연결 시 어차피 최신 구독 집합을 읽는다).
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Command::Reset) => {
                            failed.clear();
                            backoff.reset();
                            break;
                        }
                        Some(Command::Renegotiate) => {}
                        Some(Command::Shutdown) | None => break 'outer,
                    },
                }
            }
        }
    }

    *current_source.write().unwrap() = None;
    status.set(ConnectionStatus::Disconnected);
    debug!("스트림 매니저 종료");
}
