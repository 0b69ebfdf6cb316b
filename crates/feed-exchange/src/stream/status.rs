//! 연결 상태와 이벤트 버스.
//!
//! 클로저에 캡처된 임시 옵저버 목록 대신, 구독 시 명시적인 disposer를
//! 돌려주는 타입이 있는 publish/subscribe 레지스트리를 사용합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// 스트림 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// 연결 없음 (구독 없음 포함)
    Disconnected,
    /// 연결/핸드셰이크 진행 중
    Connecting,
    /// 연결됨, 스트림 수신 중
    Connected,
    /// 예기치 않은 끊김 - 백오프 후 재연결 예정
    Reconnecting,
    /// 모든 소스 실패 - 명시적 reset 전까지 재시도 없음
    Unavailable,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
            ConnectionStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusInner<T> {
    next_id: u64,
    subscribers: HashMap<u64, Callback<T>>,
}

/// 이벤트 종류별로 하나씩 두는 간단한 pub/sub 버스.
///
/// 페이로드는 불변 참조로 전달되며, 구독 해제는 반환된
/// `BusSubscription`을 드롭하거나 `dispose()`를 호출하면 됩니다.
pub struct EventBus<T> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T> {
    /// 빈 버스를 생성합니다.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                subscribers: HashMap::new(),
            })),
        }
    }

    /// 콜백을 등록하고 disposer를 반환합니다.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> BusSubscription<T> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, Arc::new(callback));

        BusSubscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// 모든 구독자에게 이벤트를 전달합니다.
    ///
    /// 콜백은 락 밖에서 호출되므로, 콜백 안에서 다시 구독해도 안전합니다.
    pub fn publish(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = {
            let inner = self.inner.lock().unwrap();
            inner.subscribers.values().cloned().collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    /// 현재 구독자 수를 반환합니다.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

/// 버스 구독 disposer. 드롭하면 구독이 해제됩니다.
pub struct BusSubscription<T> {
    bus: Weak<Mutex<BusInner<T>>>,
    id: u64,
}

impl<T> BusSubscription<T> {
    /// 명시적으로 구독을 해제합니다.
    pub fn dispose(self) {
        // Drop이 처리
    }
}

impl<T> Drop for BusSubscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().unwrap().subscribers.remove(&self.id);
        }
    }
}

/// 현재 상태를 기억하는 연결 상태 버스.
///
/// 새 구독자는 등록 즉시 현재 상태로 한 번 호출됩니다.
pub struct StatusBus {
    current: Mutex<ConnectionStatus>,
    bus: EventBus<ConnectionStatus>,
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBus {
    /// Disconnected 상태의 버스를 생성합니다.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(ConnectionStatus::Disconnected),
            bus: EventBus::new(),
        }
    }

    /// 현재 상태를 반환합니다.
    pub fn current(&self) -> ConnectionStatus {
        *self.current.lock().unwrap()
    }

    /// 상태를 바꾸고 변경이 있으면 구독자에게 알립니다.
    pub fn set(&self, status: ConnectionStatus) {
        {
            let mut current = self.current.lock().unwrap();
            if *current == status {
                return;
            }
            *current = status;
        }
        self.bus.publish(&status);
    }

    /// 상태 변경 구독. 등록 즉시 현재 상태로 호출됩니다.
    pub fn subscribe(
        &self,
        callback: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> BusSubscription<ConnectionStatus> {
        let current = self.current();
        callback(&current);
        self.bus.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_receives_published_events() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _sub = bus.subscribe(move |event| seen_clone.lock().unwrap().push(*event));

        bus.publish(&1);
        bus.publish(&2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus: EventBus<u32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = count.clone();
        let sub = bus.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&1);
        drop(sub);
        bus.publish(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_status_bus_immediate_callback() {
        let bus = StatusBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let _sub = bus.subscribe(move |status| seen_clone.lock().unwrap().push(*status));

        // 등록 즉시 현재 상태 수신
        assert_eq!(*seen.lock().unwrap(), vec![ConnectionStatus::Disconnected]);

        bus.set(ConnectionStatus::Connecting);
        bus.set(ConnectionStatus::Connecting); // 동일 상태는 중복 알림 없음
        bus.set(ConnectionStatus::Connected);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
    }
}
