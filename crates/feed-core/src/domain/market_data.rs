//! 정규화된 시장 데이터 타입.
//!
//! 이 모듈의 타입들이 어댑터가 위로 올릴 수 있는 유일한 형태입니다.
//! 거래소별 wire 형식(필드명, 단위, 심볼 표기)은 어댑터 안에서만 존재합니다.
//!
//! - `Ticker` - 24시간 시세 요약
//! - `Kline` - OHLCV 캔들스틱
//! - `OrderBook` / `OrderBookLevel` - 호가창 스냅샷
//! - `DepthUpdate` - 호가창 증분 업데이트
//! - `FundingRate` / `MarkPrice` - 무기한 선물 펀딩/마크 가격

use crate::types::{Price, Quantity, Symbol, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 24시간 시세 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 최근 체결가
    pub last_price: Price,
    /// 24시간 가격 변동 (절대값)
    pub price_change: Decimal,
    /// 24시간 변동률(%)
    pub price_change_percent: Decimal,
    /// 24시간 최고가
    pub high: Price,
    /// 24시간 최저가
    pub low: Price,
    /// 24시간 거래량 (기준 자산 단위)
    pub base_volume: Quantity,
    /// 24시간 거래대금 (호가 자산 단위)
    pub quote_volume: Quantity,
    /// 데이터 생성 시각
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// 변동 전 기준가(24시간 전 가격)를 역산합니다.
    pub fn open_price(&self) -> Price {
        self.last_price - self.price_change
    }
}

/// OHLCV 캔들스틱.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 캔들 시작 시간
    pub open_time: DateTime<Utc>,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량 (기준 자산 단위)
    pub volume: Quantity,
}

impl Kline {
    /// 양봉(종가 > 시가)인지 확인합니다.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// 캔들 범위(고가 - 저가)를 반환합니다.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// 호가창 가격 레벨. (price, quantity) 쌍.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    /// 가격
    pub price: Price,
    /// 수량
    pub quantity: Quantity,
}

/// 호가창 스냅샷.
///
/// `update_id`는 단조 증가하는 시퀀스 번호로, 증분 업데이트 병합 시
/// 갭 감지에 사용됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 매수 호가 - 가격 내림차순 정렬
    pub bids: Vec<OrderBookLevel>,
    /// 매도 호가 - 가격 오름차순 정렬
    pub asks: Vec<OrderBookLevel>,
    /// 마지막으로 적용된 업데이트 시퀀스 번호
    pub update_id: u64,
    /// 마지막 업데이트 타임스탬프
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// 최우선 매수 호가를 반환합니다.
    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    /// 최우선 매도 호가를 반환합니다.
    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    /// 스프레드를 반환합니다.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// 중간 가격을 반환합니다.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }
}

/// 호가창 증분 업데이트.
///
/// `first_update_id..=final_update_id` 범위의 변경분을 담습니다.
/// 수량 0인 레벨은 삭제를 의미합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 이 업데이트가 포함하는 첫 시퀀스 번호
    pub first_update_id: u64,
    /// 이 업데이트가 포함하는 마지막 시퀀스 번호
    pub final_update_id: u64,
    /// 변경된 매수 호가
    pub bids: Vec<OrderBookLevel>,
    /// 변경된 매도 호가
    pub asks: Vec<OrderBookLevel>,
    /// 타임스탬프
    pub timestamp: DateTime<Utc>,
}

/// 무기한 선물 펀딩 비율.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 현재 펀딩 비율 (소수, 예: 0.0001 = 0.01%)
    pub rate: Decimal,
    /// 다음 펀딩 시각
    pub next_funding_time: Option<DateTime<Utc>>,
    /// 타임스탬프
    pub timestamp: DateTime<Utc>,
}

/// 무기한 선물 마크 가격.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPrice {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 마크 가격
    pub mark_price: Price,
    /// 지수 가격 (제공하는 거래소만)
    pub index_price: Option<Price>,
    /// 타임스탬프
    pub timestamp: DateTime<Utc>,
}
