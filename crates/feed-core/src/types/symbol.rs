//! 심볼 정의.
//!
//! 모든 거래소 어댑터는 자기 거래소의 심볼 표기("BTCUSDT", "BTC-USDT" 등)를
//! 이 canonical `Symbol`로 변환해서 위로 올려야 합니다.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 거래 가능한 상품을 나타내는 트레이딩 심볼.
///
/// 기준 자산과 호가 자산으로 구성됩니다. 예: BTC/USDT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    /// 기준 자산 (예: BTC, ETH)
    pub base: String,
    /// 호가 자산 (예: USDT, USDC)
    pub quote: String,
}

impl Symbol {
    /// 새 심볼을 생성합니다.
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// "BASE/QUOTE" 형식 문자열에서 심볼을 파싱합니다.
    pub fn from_string(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            Some(Self::new(parts[0], parts[1]))
        } else {
            None
        }
    }

    /// "btcusdt" 같은 붙여 쓴 소문자 표기에서 심볼을 파싱합니다.
    ///
    /// 스트림 키와 Binance 계열 표기에서 사용됩니다. 알려진 호가 자산
    /// 접미사를 기준으로 분리하며, 매칭되지 않으면 USDT로 가정합니다.
    pub fn from_compact(s: &str) -> Self {
        let quotes = ["USDT", "USDC", "BTC", "ETH", "BUSD"];
        let upper = s.to_uppercase();

        for quote in quotes {
            if let Some(base) = upper.strip_suffix(quote) {
                if !base.is_empty() {
                    return Self::new(base, quote);
                }
            }
        }

        Self::new(upper, "USDT")
    }

    /// "btcusdt" 형식의 붙여 쓴 소문자 표기를 반환합니다.
    pub fn to_compact(&self) -> String {
        format!("{}{}", self.base.to_lowercase(), self.quote.to_lowercase())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}
