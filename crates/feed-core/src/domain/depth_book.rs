//! 호가창 증분 병합.
//!
//! 스냅샷 위에 `DepthUpdate`를 순서대로 적용합니다. 시퀀스 번호에
//! 갭이 감지되면 병합을 중단하고 `DepthGap`을 반환하므로, 호출자는
//! 반드시 새 스냅샷으로 재동기화해야 합니다. 갭을 조용히 무시하면
//! 호가창이 영구히 틀어집니다.

use crate::domain::market_data::{DepthUpdate, OrderBook, OrderBookLevel};
use crate::types::Price;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use thiserror::Error;

/// 시퀀스 갭 감지 - 스냅샷 재동기화 필요.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("depth sequence gap: last applied {last_applied}, update starts at {update_first}")]
pub struct DepthGap {
    /// 마지막으로 적용된 시퀀스 번호
    pub last_applied: u64,
    /// 들어온 업데이트의 첫 시퀀스 번호
    pub update_first: u64,
}

/// 증분 업데이트를 병합하는 로컬 호가창.
#[derive(Debug, Clone)]
pub struct DepthBook {
    book: OrderBook,
    bids: BTreeMap<Price, Decimal>,
    asks: BTreeMap<Price, Decimal>,
}

impl DepthBook {
    /// 스냅샷에서 로컬 호가창을 생성합니다.
    pub fn from_snapshot(snapshot: OrderBook) -> Self {
        let bids = snapshot
            .bids
            .iter()
            .map(|l| (l.price, l.quantity))
            .collect();
        let asks = snapshot
            .asks
            .iter()
            .map(|l| (l.price, l.quantity))
            .collect();

        Self {
            book: snapshot,
            bids,
            asks,
        }
    }

    /// 마지막으로 적용된 시퀀스 번호를 반환합니다.
    pub fn last_update_id(&self) -> u64 {
        self.book.update_id
    }

    /// 증분 업데이트를 적용합니다.
    ///
    /// 스냅샷보다 오래된 업데이트는 무시합니다(`Ok`).
    /// 시퀀스 갭이 있으면 상태를 바꾸지 않고 `DepthGap`을 반환합니다.
    pub fn apply(&mut self, update: &DepthUpdate) -> Result<(), DepthGap> {
        // 스냅샷 이전 구간은 이미 반영된 것
        if update.final_update_id <= self.book.update_id {
            return Ok(());
        }

        if update.first_update_id > self.book.update_id + 1 {
            return Err(DepthGap {
                last_applied: self.book.update_id,
                update_first: update.first_update_id,
            });
        }

        for level in &update.bids {
            if level.quantity.is_zero() {
                self.bids.remove(&level.price);
            } else {
                self.bids.insert(level.price, level.quantity);
            }
        }
        for level in &update.asks {
            if level.quantity.is_zero() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.quantity);
            }
        }

        self.book.update_id = update.final_update_id;
        self.book.timestamp = update.timestamp;
        self.rebuild_levels();
        Ok(())
    }

    /// 현재 호가창 스냅샷을 반환합니다.
    pub fn snapshot(&self) -> &OrderBook {
        &self.book
    }

    fn rebuild_levels(&mut self) {
        self.book.bids = self
            .bids
            .iter()
            .rev()
            .map(|(price, quantity)| OrderBookLevel {
                price: *price,
                quantity: *quantity,
            })
            .collect();
        self.book.asks = self
            .asks
            .iter()
            .map(|(price, quantity)| OrderBookLevel {
                price: *price,
                quantity: *quantity,
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Symbol;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot() -> OrderBook {
        OrderBook {
            symbol: Symbol::new("BTC", "USDT"),
            bids: vec![
                OrderBookLevel { price: dec!(50000), quantity: dec!(1) },
                OrderBookLevel { price: dec!(49999), quantity: dec!(2) },
            ],
            asks: vec![
                OrderBookLevel { price: dec!(50001), quantity: dec!(1) },
                OrderBookLevel { price: dec!(50002), quantity: dec!(3) },
            ],
            update_id: 100,
            timestamp: Utc::now(),
        }
    }

    fn update(first: u64, last: u64) -> DepthUpdate {
        DepthUpdate {
            symbol: Symbol::new("BTC", "USDT"),
            first_update_id: first,
            final_update_id: last,
            bids: vec![OrderBookLevel { price: dec!(50000), quantity: dec!(5) }],
            asks: vec![OrderBookLevel { price: dec!(50001), quantity: dec!(0) }],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_apply_contiguous_update() {
        let mut book = DepthBook::from_snapshot(snapshot());

        book.apply(&update(101, 105)).unwrap();

        assert_eq!(book.last_update_id(), 105);
        assert_eq!(book.snapshot().best_bid(), Some(dec!(50000)));
        assert_eq!(book.snapshot().bids[0].quantity, dec!(5));
        // 수량 0 → 레벨 삭제
        assert_eq!(book.snapshot().best_ask(), Some(dec!(50002)));
    }

    #[test]
    fn test_stale_update_ignored() {
        let mut book = DepthBook::from_snapshot(snapshot());

        book.apply(&update(90, 95)).unwrap();

        assert_eq!(book.last_update_id(), 100);
        assert_eq!(book.snapshot().bids[0].quantity, dec!(1));
    }

    #[test]
    fn test_gap_forces_resync() {
        let mut book = DepthBook::from_snapshot(snapshot());

        let err = book.apply(&update(110, 120)).unwrap_err();

        assert_eq!(err.last_applied, 100);
        assert_eq!(err.update_first, 110);
        // 갭 발생 시 상태는 그대로
        assert_eq!(book.last_update_id(), 100);
        assert_eq!(book.snapshot().bids[0].quantity, dec!(1));
    }

    #[test]
    fn test_overlapping_update_applies() {
        let mut book = DepthBook::from_snapshot(snapshot());

        // 스냅샷 구간과 겹치는 업데이트는 정상 적용
        book.apply(&update(95, 103)).unwrap();

        assert_eq!(book.last_update_id(), 103);
    }
}
