//! 계좌/주문 클라이언트.
//!
//! 계좌와 주문은 시장 데이터와 달리 페일오버 대상이 아닙니다. 다른
//! 거래소의 계좌는 다른 계좌이므로, 항상 명시적으로 선택된 하나의
//! 거래소만 상대합니다. 조회 실패 시에는 짧은 시간(기본 60초) 이내의
//! 캐시 스냅샷만 대체로 허용하고, 그 외에는 에러를 그대로 전파합니다.

use crate::error::{SourceError, SourceResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_core::{Sourced, Symbol};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// 계좌/주문 타입
// ============================================================================

/// 자산 잔고.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// 자산 이름 (예: "USDT")
    pub asset: String,
    /// 지갑 잔고
    pub wallet: Decimal,
    /// 사용 가능한 잔고
    pub available: Decimal,
}

/// 계좌 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// 거래소 이름
    pub venue: String,
    /// 잔고 목록 (0이 아닌 자산만)
    pub balances: Vec<Balance>,
    /// 받아온 시각
    pub fetched_at: DateTime<Utc>,
}

/// 주문 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// 시장가
    Market,
    /// 지정가
    Limit,
}

/// 주문 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 방향
    pub side: Side,
    /// 유형
    pub order_type: OrderType,
    /// 수량
    pub quantity: Decimal,
    /// 지정가 (시장가면 None)
    pub price: Option<Decimal>,
}

/// 미체결 주문.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    /// 주문 ID
    pub order_id: String,
    /// 거래 심볼
    pub symbol: Symbol,
    /// 방향
    pub side: Side,
    /// 주문 가격
    pub price: Decimal,
    /// 원 수량
    pub quantity: Decimal,
    /// 체결된 수량
    pub executed: Decimal,
}

/// 단일 거래소 계좌/주문 인터페이스.
#[async_trait]
pub trait AccountVenue: Send + Sync {
    /// 거래소 이름.
    fn venue(&self) -> &str;

    /// 계좌 스냅샷 조회.
    async fn fetch_account(&self) -> SourceResult<AccountSnapshot>;

    /// 주문 제출. 주문 ID를 반환합니다.
    async fn place_order(&self, request: &OrderRequest) -> SourceResult<String>;

    /// 주문 취소.
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> SourceResult<()>;

    /// 미체결 주문 조회.
    async fn open_orders(&self, symbol: Option<&Symbol>) -> SourceResult<Vec<OpenOrder>>;
}

// ============================================================================
// 계좌 클라이언트
// ============================================================================

/// 페일오버 없는 계좌 클라이언트.
pub struct AccountClient {
    venue: Arc<dyn AccountVenue>,
    /// 조회 실패 시 스냅샷 재사용 한도
    snapshot_ceiling: Duration,
    last_snapshot: RwLock<Option<AccountSnapshot>>,
}

impl AccountClient {
    /// 새 계좌 클라이언트를 생성합니다.
    pub fn new(venue: Arc<dyn AccountVenue>, snapshot_ceiling: Duration) -> Self {
        Self {
            venue,
            snapshot_ceiling,
            last_snapshot: RwLock::new(None),
        }
    }

    /// 계좌 스냅샷을 조회합니다.
    ///
    /// 실패 시 한도 이내의 캐시 스냅샷이 있으면 `cached`로 반환하고,
    /// 없거나 너무 오래됐으면 원래 에러를 그대로 전파합니다. 다른
    /// 거래소로 넘어가는 일은 절대 없습니다.
    pub async fn account(&self) -> SourceResult<Sourced<AccountSnapshot>> {
        match self.venue.fetch_account().await {
            Ok(snapshot) => {
                *self.last_snapshot.write().unwrap() = Some(snapshot.clone());
                Ok(Sourced::live(snapshot, self.venue.venue()))
            }
            Err(e) => {
                let last = self.last_snapshot.read().unwrap().clone();
                if let Some(snapshot) = last {
                    let age = Utc::now()
                        .signed_duration_since(snapshot.fetched_at)
                        .to_std()
                        .unwrap_or_default();
                    if age <= self.snapshot_ceiling {
                        warn!(
                            venue = self.venue.venue(),
                            age_ms = age.as_millis() as u64,
                            error = %e,
                            "계좌 조회 실패, 캐시 스냅샷 반환"
                        );
                        let fetched_at = snapshot.fetched_at;
                        return Ok(Sourced::cached(snapshot, self.venue.venue(), fetched_at));
                    }
                }
                Err(e)
            }
        }
    }

    /// 주문 제출. 실패는 그대로 전파됩니다.
    pub async fn place_order(&self, request: &OrderRequest) -> SourceResult<String> {
        self.venue.place_order(request).await
    }

    /// 주문 취소. 실패는 그대로 전파됩니다.
    pub async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> SourceResult<()> {
        self.venue.cancel_order(symbol, order_id).await
    }

    /// 미체결 주문 조회. 실패는 그대로 전파됩니다.
    pub async fn open_orders(&self, symbol: Option<&Symbol>) -> SourceResult<Vec<OpenOrder>> {
        self.venue.open_orders(symbol).await
    }
}

// ============================================================================
// Binance 계좌 venue
// ============================================================================

/// Binance 선물 계좌 venue (서명 REST).
pub struct BinanceAccount {
    rest_base_url: String,
    api_key: String,
    api_secret: SecretString,
    recv_window: u64,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceAssetBalance {
    asset: String,
    wallet_balance: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceAccountResponse {
    assets: Vec<BinanceAssetBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrderResponse {
    order_id: i64,
    symbol: String,
    side: String,
    price: String,
    orig_qty: String,
    executed_qty: String,
}

impl BinanceAccount {
    /// 새 Binance 계좌 venue를 생성합니다.
    pub fn new(
        rest_base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: SecretString,
    ) -> SourceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SourceError::Transport(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            rest_base_url: rest_base_url.into(),
            api_key: api_key.into(),
            api_secret,
            recv_window: 5000,
            client,
        })
    }

    /// 환경 변수(BINANCE_API_KEY / BINANCE_API_SECRET)에서 생성합니다.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("BINANCE_API_KEY").ok()?;
        let api_secret = SecretString::from(std::env::var("BINANCE_API_SECRET").ok()?);
        Self::new("https://fapi.binance.com", api_key, api_secret).ok()
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// HMAC-SHA256으로 쿼리 문자열 서명.
    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .expect("HMAC key of any length is valid");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let mut all: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        all.push(format!("timestamp={}", Self::timestamp_ms()));
        all.push(format!("recvWindow={}", self.recv_window));
        let query = all.join("&");
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    async fn signed_request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> SourceResult<T> {
        let query = self.signed_query(params);
        let url = format!("{}{}?{}", self.rest_base_url, endpoint, query);

        debug!("{} (signed) {}", method, endpoint);
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| SourceError::Protocol(e.to_string()))
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(SourceError::Unauthorized(body))
        } else {
            Err(SourceError::Api {
                code: status.as_u16() as i32,
                message: body,
            })
        }
    }

    fn parse_decimal(s: &str) -> Decimal {
        s.parse().unwrap_or(Decimal::ZERO)
    }

    fn format_symbol(symbol: &Symbol) -> String {
        format!("{}{}", symbol.base, symbol.quote)
    }
}

#[async_trait]
impl AccountVenue for BinanceAccount {
    fn venue(&self) -> &str {
        "binance"
    }

    async fn fetch_account(&self) -> SourceResult<AccountSnapshot> {
        let resp: BinanceAccountResponse = self
            .signed_request(reqwest::Method::GET, "/fapi/v2/account", &[])
            .await?;

        let balances = resp
            .assets
            .into_iter()
            .filter_map(|b| {
                let wallet = Self::parse_decimal(&b.wallet_balance);
                let available = Self::parse_decimal(&b.available_balance);
                (wallet > Decimal::ZERO || available > Decimal::ZERO).then_some(Balance {
                    asset: b.asset,
                    wallet,
                    available,
                })
            })
            .collect();

        Ok(AccountSnapshot {
            venue: "binance".to_string(),
            balances,
            fetched_at: Utc::now(),
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> SourceResult<String> {
        let side = match request.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let order_type = match request.order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        };

        let mut params = vec![
            ("symbol", Self::format_symbol(&request.symbol)),
            ("side", side.to_string()),
            ("type", order_type.to_string()),
            ("quantity", request.quantity.to_string()),
        ];
        if let Some(price) = request.price {
            params.push(("price", price.to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }

        let resp: BinanceOrderResponse = self
            .signed_request(reqwest::Method::POST, "/fapi/v1/order", &params)
            .await?;

        info!(order_id = resp.order_id, symbol = %request.symbol, "주문 제출됨");
        Ok(resp.order_id.to_string())
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> SourceResult<()> {
        let params = vec![
            ("symbol", Self::format_symbol(symbol)),
            ("orderId", order_id.to_string()),
        ];
        let _: BinanceOrderResponse = self
            .signed_request(reqwest::Method::DELETE, "/fapi/v1/order", &params)
            .await?;

        info!(order_id, "주문 취소됨");
        Ok(())
    }

    async fn open_orders(&self, symbol: Option<&Symbol>) -> SourceResult<Vec<OpenOrder>> {
        let params: Vec<(&str, String)> = match symbol {
            Some(s) => vec![("symbol", Self::format_symbol(s))],
            None => vec![],
        };

        let resp: Vec<BinanceOrderResponse> = self
            .signed_request(reqwest::Method::GET, "/fapi/v1/openOrders", &params)
            .await?;

        Ok(resp
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id.to_string(),
                symbol: Symbol::from_compact(&o.symbol),
                side: if o.side == "SELL" { Side::Sell } else { Side::Buy },
                price: Self::parse_decimal(&o.price),
                quantity: Self::parse_decimal(&o.orig_qty),
                executed: Self::parse_decimal(&o.executed_qty),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::Reality;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockVenue {
        fail: AtomicBool,
    }

    impl MockVenue {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
            }
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn snapshot() -> AccountSnapshot {
            AccountSnapshot {
                venue: "mock".to_string(),
                balances: vec![Balance {
                    asset: "USDT".to_string(),
                    wallet: dec!(1000),
                    available: dec!(900),
                }],
                fetched_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl AccountVenue for MockVenue {
        fn venue(&self) -> &str {
            "mock"
        }

        async fn fetch_account(&self) -> SourceResult<AccountSnapshot> {
            if self.fail.load(Ordering::SeqCst) {
                Err(SourceError::Transport("connection refused".to_string()))
            } else {
                Ok(Self::snapshot())
            }
        }

        async fn place_order(&self, _request: &OrderRequest) -> SourceResult<String> {
            Err(SourceError::NotSupported("mock".to_string()))
        }

        async fn cancel_order(&self, _symbol: &Symbol, _order_id: &str) -> SourceResult<()> {
            Ok(())
        }

        async fn open_orders(&self, _symbol: Option<&Symbol>) -> SourceResult<Vec<OpenOrder>> {
            Ok(vec![])
        }
    }

    fn seed(client: &AccountClient, age_secs: i64) {
        let mut snapshot = MockVenue::snapshot();
        snapshot.fetched_at = Utc::now() - chrono::Duration::seconds(age_secs);
        *client.last_snapshot.write().unwrap() = Some(snapshot);
    }

    #[tokio::test]
    async fn test_successful_fetch_is_live() {
        let venue = Arc::new(MockVenue::new());
        let client = AccountClient::new(venue, Duration::from_secs(60));

        let result = client.account().await.unwrap();
        assert_eq!(result.meta.reality, Reality::Real);
        assert_eq!(result.data.balances[0].wallet, dec!(1000));
    }

    #[tokio::test]
    async fn test_recent_snapshot_served_on_failure() {
        let venue = Arc::new(MockVenue::new());
        let client = AccountClient::new(venue.clone(), Duration::from_secs(60));

        seed(&client, 30); // 30초 전 스냅샷
        venue.set_fail(true);

        let result = client.account().await.unwrap();
        assert_eq!(result.meta.reality, Reality::Cached);
        assert!(result.meta.age_ms >= 30_000);
    }

    #[tokio::test]
    async fn test_stale_snapshot_propagates_error() {
        let venue = Arc::new(MockVenue::new());
        let client = AccountClient::new(venue.clone(), Duration::from_secs(60));

        seed(&client, 90); // 한도 60초를 넘은 스냅샷
        venue.set_fail(true);

        let err = client.account().await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
    }

    #[tokio::test]
    async fn test_order_errors_propagate() {
        let venue = Arc::new(MockVenue::new());
        let client = AccountClient::new(venue, Duration::from_secs(60));

        let request = OrderRequest {
            symbol: Symbol::new("BTC", "USDT"),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: dec!(0.01),
            price: None,
        };
        assert!(client.place_order(&request).await.is_err());
    }
}
