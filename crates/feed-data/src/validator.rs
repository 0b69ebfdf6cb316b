//! 시장 데이터 타당성 검사.
//!
//! 거래소가 2xx로 내려준 값이라도 신뢰하기 전에 타당성을 확인합니다.
//! 검증에 실패한 값은 실패한 fetch와 동일하게 취급되어 다음 소스로
//! 페일오버되며, 절대 캐시되지 않습니다.

use crate::error::ValidationError;
use feed_core::{Kline, MarkPrice, OrderBook, Ticker};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// 데이터 검증기.
#[derive(Debug, Clone)]
pub struct Validator {
    /// 이 가격을 넘으면 비정상으로 간주 (호가 자산 단위)
    pub max_price: Decimal,
    /// 24시간 변동률 절대값 상한 (%)
    pub max_change_percent: Decimal,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            // 상장된 어떤 코인 가격보다도 넉넉히 위
            max_price: dec!(10_000_000),
            max_change_percent: dec!(100),
        }
    }
}

impl Validator {
    /// 시세를 검증합니다.
    pub fn validate_ticker(&self, ticker: &Ticker) -> Result<(), ValidationError> {
        if ticker.last_price <= Decimal::ZERO {
            return Err(ValidationError(format!(
                "non-positive price: {}",
                ticker.last_price
            )));
        }
        if ticker.last_price > self.max_price {
            return Err(ValidationError(format!(
                "implausible price: {}",
                ticker.last_price
            )));
        }
        if ticker.base_volume < Decimal::ZERO {
            return Err(ValidationError(format!(
                "negative volume: {}",
                ticker.base_volume
            )));
        }
        if ticker.price_change_percent.abs() > self.max_change_percent {
            return Err(ValidationError(format!(
                "implausible change percent: {}",
                ticker.price_change_percent
            )));
        }
        Ok(())
    }

    /// 캔들 목록을 검증합니다.
    pub fn validate_klines(&self, klines: &[Kline]) -> Result<(), ValidationError> {
        if klines.is_empty() {
            return Err(ValidationError("empty kline batch".to_string()));
        }
        for kline in klines {
            if kline.open <= Decimal::ZERO
                || kline.high <= Decimal::ZERO
                || kline.low <= Decimal::ZERO
                || kline.close <= Decimal::ZERO
            {
                return Err(ValidationError(format!(
                    "non-positive ohlc at {}",
                    kline.open_time
                )));
            }
            if kline.high < kline.low {
                return Err(ValidationError(format!(
                    "high {} below low {} at {}",
                    kline.high, kline.low, kline.open_time
                )));
            }
            if kline.volume < Decimal::ZERO {
                return Err(ValidationError(format!(
                    "negative volume at {}",
                    kline.open_time
                )));
            }
        }
        Ok(())
    }

    /// 호가창을 검증합니다.
    pub fn validate_depth(&self, book: &OrderBook) -> Result<(), ValidationError> {
        if book.bids.is_empty() && book.asks.is_empty() {
            return Err(ValidationError("empty order book".to_string()));
        }
        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            if bid >= ask {
                return Err(ValidationError(format!(
                    "crossed book: bid {} >= ask {}",
                    bid, ask
                )));
            }
        }
        for level in book.bids.iter().chain(book.asks.iter()) {
            if level.price <= Decimal::ZERO || level.quantity < Decimal::ZERO {
                return Err(ValidationError(format!(
                    "invalid level: {} @ {}",
                    level.quantity, level.price
                )));
            }
        }
        Ok(())
    }

    /// 마크 가격을 검증합니다.
    pub fn validate_mark_price(&self, mark: &MarkPrice) -> Result<(), ValidationError> {
        if mark.mark_price <= Decimal::ZERO || mark.mark_price > self.max_price {
            return Err(ValidationError(format!(
                "implausible mark price: {}",
                mark.mark_price
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use feed_core::{OrderBookLevel, Symbol, Timeframe};

    fn ticker(price: Decimal, volume: Decimal, change_percent: Decimal) -> Ticker {
        Ticker {
            symbol: Symbol::new("BTC", "USDT"),
            last_price: price,
            price_change: Decimal::ZERO,
            price_change_percent: change_percent,
            high: price,
            low: price,
            base_volume: volume,
            quote_volume: Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_rejects_bad_tickers() {
        let v = Validator::default();

        assert!(v.validate_ticker(&ticker(dec!(0), dec!(100), dec!(1))).is_err());
        assert!(v.validate_ticker(&ticker(dec!(-5), dec!(100), dec!(1))).is_err());
        assert!(v.validate_ticker(&ticker(dec!(50000), dec!(-1), dec!(1))).is_err());
        assert!(v.validate_ticker(&ticker(dec!(50000), dec!(100), dec!(150))).is_err());
        assert!(v
            .validate_ticker(&ticker(dec!(99_000_000), dec!(100), dec!(1)))
            .is_err());
    }

    #[test]
    fn test_accepts_plausible_ticker() {
        let v = Validator::default();
        assert!(v
            .validate_ticker(&ticker(dec!(50000), dec!(100), dec!(3.5)))
            .is_ok());
        // 음수 변동률도 범위 안이면 정상
        assert!(v
            .validate_ticker(&ticker(dec!(50000), dec!(100), dec!(-12.5)))
            .is_ok());
    }

    #[test]
    fn test_rejects_empty_and_inverted_klines() {
        let v = Validator::default();
        assert!(v.validate_klines(&[]).is_err());

        let kline = Kline {
            symbol: Symbol::new("BTC", "USDT"),
            timeframe: Timeframe::M1,
            open_time: Utc::now(),
            open: dec!(100),
            high: dec!(90), // high < low
            low: dec!(95),
            close: dec!(92),
            volume: dec!(1),
        };
        assert!(v.validate_klines(&[kline]).is_err());
    }

    #[test]
    fn test_rejects_crossed_book() {
        let v = Validator::default();
        let book = OrderBook {
            symbol: Symbol::new("BTC", "USDT"),
            bids: vec![OrderBookLevel { price: dec!(50001), quantity: dec!(1) }],
            asks: vec![OrderBookLevel { price: dec!(50000), quantity: dec!(1) }],
            update_id: 1,
            timestamp: Utc::now(),
        };
        assert!(v.validate_depth(&book).is_err());
    }
}
