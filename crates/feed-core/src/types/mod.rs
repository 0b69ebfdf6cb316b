//! 공통 타입 정의.

mod symbol;
mod timeframe;

pub use symbol::Symbol;
pub use timeframe::Timeframe;

use rust_decimal::Decimal;

/// 가격 타입.
pub type Price = Decimal;

/// 수량 타입.
pub type Quantity = Decimal;
