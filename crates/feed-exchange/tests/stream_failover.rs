//! 스트림 매니저 통합 테스트.
//!
//! 시뮬레이션 connector로 소스 순환, 재협상, 재연결, unavailable 전이를
//! 네트워크 없이 검증한다.

use feed_core::{StreamConfig, Symbol};
use feed_exchange::{
    build_sources, ConnectionStatus, SimWsConnector, SourceWire, StreamEvent, StreamKey,
    StreamManager,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const BINANCE_WS: &str = "wss://fstream.binance.com/ws";
const OKX_WS: &str = "wss://ws.okx.com:8443/ws/v5/public";
const BYBIT_WS: &str = "wss://stream.bybit.com/v5/public/linear";

fn wires() -> Vec<Arc<dyn SourceWire>> {
    build_sources(&Default::default())
        .unwrap()
        .into_iter()
        .map(|source| source.wire().expect("all sources support ws"))
        .collect()
}

fn fast_config() -> StreamConfig {
    StreamConfig {
        backoff_base_ms: 20.0,
        backoff_factor: 1.5,
        backoff_cap_ms: 100.0,
    }
}

fn manager_with(connector: Arc<SimWsConnector>) -> StreamManager {
    StreamManager::new(wires(), connector, fast_config())
}

/// 상태 변경을 채널로 받아볼 수 있게 등록한다.
fn status_channel(
    manager: &StreamManager,
) -> (
    mpsc::UnboundedReceiver<ConnectionStatus>,
    feed_exchange::stream::BusSubscription<ConnectionStatus>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = manager.on_status_change(move |status| {
        let _ = tx.send(*status);
    });
    (rx, sub)
}

async fn wait_for_status(
    rx: &mut mpsc::UnboundedReceiver<ConnectionStatus>,
    want: ConnectionStatus,
) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(status) = rx.recv().await {
            if status == want {
                return;
            }
        }
        panic!("status channel closed before reaching {want}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for status {want}"));
}

fn ticker_key() -> StreamKey {
    "btcusdt@ticker".parse().unwrap()
}

#[tokio::test]
async fn test_falls_through_ranked_sources_on_connect_failure() {
    let connector = Arc::new(SimWsConnector::new());
    connector.refuse(BINANCE_WS);
    connector.refuse(OKX_WS);
    connector.accept(BYBIT_WS);

    let manager = manager_with(connector.clone());
    let (mut rx, _sub) = status_channel(&manager);

    let _guard = manager.subscribe(ticker_key(), Arc::new(|_| {}));

    wait_for_status(&mut rx, ConnectionStatus::Connected).await;
    assert_eq!(manager.current_source(), Some("bybit".to_string()));
    assert_eq!(connector.connection_count(BYBIT_WS), 1);

    // 구독 프레임이 bybit 형식으로 전송됐는지 확인
    let remote = connector.last_remote(BYBIT_WS).unwrap();
    assert!(remote.sent_frames()[0].contains("tickers.BTCUSDT"));
}

#[tokio::test]
async fn test_unsubscribe_last_handler_disconnects() {
    let connector = Arc::new(SimWsConnector::new());
    connector.accept(BINANCE_WS);

    let manager = manager_with(connector);
    let (mut rx, _sub) = status_channel(&manager);

    let guard = manager.subscribe(ticker_key(), Arc::new(|_| {}));
    wait_for_status(&mut rx, ConnectionStatus::Connected).await;

    guard.unsubscribe();
    wait_for_status(&mut rx, ConnectionStatus::Disconnected).await;
    assert_eq!(manager.current_source(), None);
}

#[tokio::test]
async fn test_two_handlers_receive_identical_payload() {
    let connector = Arc::new(SimWsConnector::new());
    connector.accept(BINANCE_WS);

    let manager = manager_with(connector.clone());
    let (mut rx, _sub) = status_channel(&manager);

    let seen_a: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_b: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));

    let a = seen_a.clone();
    let _guard_a = manager.subscribe(
        ticker_key(),
        Arc::new(move |event| a.lock().unwrap().push(event.clone())),
    );
    wait_for_status(&mut rx, ConnectionStatus::Connected).await;

    let b = seen_b.clone();
    let _guard_b = manager.subscribe(
        ticker_key(),
        Arc::new(move |event| b.lock().unwrap().push(event.clone())),
    );

    // 같은 키 구독 추가는 집합이 안 바뀌므로 연결 유지
    tokio::time::sleep(Duration::from_millis(50)).await;
    let remote = connector.last_remote(BINANCE_WS).unwrap();
    remote.push_text(
        r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"500","P":"1.01","c":"50000.5","h":"51000","l":"49000","v":"12345","q":"617000000"}"#,
    );

    for _ in 0..100 {
        if !seen_a.lock().unwrap().is_empty() && !seen_b.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let a = seen_a.lock().unwrap();
    let b = seen_b.lock().unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    // 두 핸들러가 동일한 정규화 페이로드를 받는다
    assert_eq!(a[0], b[0]);
    let StreamEvent::Ticker(ticker) = &a[0] else {
        panic!("expected ticker event");
    };
    assert_eq!(ticker.symbol, Symbol::new("BTC", "USDT"));
}

#[tokio::test]
async fn test_renegotiates_when_subscription_set_changes() {
    let connector = Arc::new(SimWsConnector::new());
    connector.accept(BINANCE_WS);

    let manager = manager_with(connector.clone());
    let (mut rx, _sub) = status_channel(&manager);

    let _ticker = manager.subscribe(ticker_key(), Arc::new(|_| {}));
    wait_for_status(&mut rx, ConnectionStatus::Connected).await;
    assert_eq!(connector.connection_count(BINANCE_WS), 1);

    // 새 스트림 키 → wire 구독 집합이 바뀌므로 닫고 다시 연다
    let _kline = manager.subscribe("btcusdt@kline_1m".parse().unwrap(), Arc::new(|_| {}));
    wait_for_status(&mut rx, ConnectionStatus::Connecting).await;
    wait_for_status(&mut rx, ConnectionStatus::Connected).await;
    assert_eq!(connector.connection_count(BINANCE_WS), 2);

    let remote = connector.last_remote(BINANCE_WS).unwrap();
    let frame = &remote.sent_frames()[0];
    assert!(frame.contains("btcusdt@ticker"));
    assert!(frame.contains("btcusdt@kline_1m"));
}

#[tokio::test]
async fn test_reconnects_with_backoff_after_drop() {
    let connector = Arc::new(SimWsConnector::new());
    connector.accept(BINANCE_WS);

    let manager = manager_with(connector.clone());
    let (mut rx, _sub) = status_channel(&manager);

    let _guard = manager.subscribe(ticker_key(), Arc::new(|_| {}));
    wait_for_status(&mut rx, ConnectionStatus::Connected).await;

    // 연결된 상태에서의 transport 에러 → reconnecting → 백오프 후 재연결
    connector
        .last_remote(BINANCE_WS)
        .unwrap()
        .push_error("connection reset");

    wait_for_status(&mut rx, ConnectionStatus::Reconnecting).await;
    wait_for_status(&mut rx, ConnectionStatus::Connected).await;
    assert_eq!(connector.connection_count(BINANCE_WS), 2);
    assert_eq!(manager.current_source(), Some("binance".to_string()));
}

#[tokio::test]
async fn test_all_sources_failed_is_terminal_until_reset() {
    let connector = Arc::new(SimWsConnector::new());
    connector.refuse(BINANCE_WS);
    connector.refuse(OKX_WS);
    connector.refuse(BYBIT_WS);

    let manager = manager_with(connector.clone());
    let (mut rx, _sub) = status_channel(&manager);

    let _guard = manager.subscribe(ticker_key(), Arc::new(|_| {}));
    wait_for_status(&mut rx, ConnectionStatus::Unavailable).await;

    // unavailable에서는 구독 변경으로도 재시도하지 않는다
    let _extra = manager.subscribe("ethusdt@ticker".parse().unwrap(), Arc::new(|_| {}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.status(), ConnectionStatus::Unavailable);

    // reset만이 유일한 탈출 경로
    connector.accept(BINANCE_WS);
    manager.reset();
    wait_for_status(&mut rx, ConnectionStatus::Connected).await;
    assert_eq!(manager.current_source(), Some("binance".to_string()));
}

#[tokio::test]
async fn test_unparseable_message_skipped_silently() {
    let connector = Arc::new(SimWsConnector::new());
    connector.accept(BINANCE_WS);

    let manager = manager_with(connector.clone());
    let (mut rx, _sub) = status_channel(&manager);

    let seen: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let _guard = manager.subscribe(
        ticker_key(),
        Arc::new(move |event| s.lock().unwrap().push(event.clone())),
    );
    wait_for_status(&mut rx, ConnectionStatus::Connected).await;

    let remote = connector.last_remote(BINANCE_WS).unwrap();
    remote.push_text("garbage not json");
    remote.push_text(r#"{"result":null,"id":1}"#);
    remote.push_text(
        r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"500","P":"1.01","c":"50000.5","h":"51000","l":"49000","v":"12345","q":"617000000"}"#,
    );

    for _ in 0..100 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // 불량 메시지 두 개는 그 메시지만 스킵되고 연결은 유지된다
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Connected);
}
