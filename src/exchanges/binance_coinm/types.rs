//! Small enums for the parameters that shape channel names and request params.
//!
//! Request and response payloads stay `serde_json::Value`; these only cover
//! what the client itself has to render.

use crate::core::kernel::RestRequest;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// Candlestick interval.
    Interval {
        OneMinute => "1m",
        ThreeMinutes => "3m",
        FiveMinutes => "5m",
        FifteenMinutes => "15m",
        ThirtyMinutes => "30m",
        OneHour => "1h",
        TwoHours => "2h",
        FourHours => "4h",
        SixHours => "6h",
        EightHours => "8h",
        TwelveHours => "12h",
        OneDay => "1d",
        ThreeDays => "3d",
        OneWeek => "1w",
        OneMonth => "1M",
    }
);

wire_enum!(
    ContractType {
        Perpetual => "PERPETUAL",
        CurrentQuarter => "CURRENT_QUARTER",
        NextQuarter => "NEXT_QUARTER",
    }
);

impl ContractType {
    /// Lowercase form used inside stream names.
    pub fn stream_name(self) -> String {
        self.as_str().to_lowercase()
    }
}

wire_enum!(
    OrderSide {
        Buy => "BUY",
        Sell => "SELL",
    }
);

wire_enum!(
    OrderType {
        Limit => "LIMIT",
        Market => "MARKET",
        Stop => "STOP",
        StopMarket => "STOP_MARKET",
        TakeProfit => "TAKE_PROFIT",
        TakeProfitMarket => "TAKE_PROFIT_MARKET",
        TrailingStopMarket => "TRAILING_STOP_MARKET",
    }
);

wire_enum!(
    TimeInForce {
        GoodTillCancelled => "GTC",
        ImmediateOrCancel => "IOC",
        FillOrKill => "FOK",
        GoodTillCrossing => "GTX",
    }
);

wire_enum!(
    MarginType {
        Isolated => "ISOLATED",
        Crossed => "CROSSED",
    }
);

wire_enum!(
    PositionSide {
        Both => "BOTH",
        Long => "LONG",
        Short => "SHORT",
    }
);

wire_enum!(
    WorkingType {
        MarkPrice => "MARK_PRICE",
        ContractPrice => "CONTRACT_PRICE",
    }
);

wire_enum!(
    /// Direction of an isolated margin adjustment.
    MarginChange {
        Add => "1",
        Reduce => "2",
    }
);

wire_enum!(
    /// Bucket size for the futures-data statistics endpoints.
    StatsPeriod {
        FiveMinutes => "5m",
        FifteenMinutes => "15m",
        ThirtyMinutes => "30m",
        OneHour => "1h",
        TwoHours => "2h",
        FourHours => "4h",
        SixHours => "6h",
        TwelveHours => "12h",
        OneDay => "1d",
    }
);

/// Parameters of `POST /dapi/v1/order`.
///
/// Quantities and prices are strings so the caller controls precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Option<String>,
    pub price: Option<String>,
    pub time_in_force: Option<TimeInForce>,
    pub position_side: Option<PositionSide>,
    pub reduce_only: Option<bool>,
    pub stop_price: Option<String>,
    pub close_position: Option<bool>,
    pub activation_price: Option<String>,
    pub callback_rate: Option<String>,
    pub working_type: Option<WorkingType>,
    pub price_protect: Option<bool>,
    pub new_client_order_id: Option<String>,
}

impl NewOrder {
    pub fn new(symbol: impl Into<String>, side: OrderSide, order_type: OrderType) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type,
            quantity: None,
            price: None,
            time_in_force: None,
            position_side: None,
            reduce_only: None,
            stop_price: None,
            close_position: None,
            activation_price: None,
            callback_rate: None,
            working_type: None,
            price_protect: None,
            new_client_order_id: None,
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: impl Into<String>) -> Self {
        Self::new(symbol, side, OrderType::Market).quantity(quantity)
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: impl Into<String>,
        price: impl Into<String>,
        time_in_force: TimeInForce,
    ) -> Self {
        Self::new(symbol, side, OrderType::Limit)
            .quantity(quantity)
            .price(price)
            .time_in_force(time_in_force)
    }

    #[must_use]
    pub fn quantity(mut self, quantity: impl Into<String>) -> Self {
        self.quantity = Some(quantity.into());
        self
    }

    #[must_use]
    pub fn price(mut self, price: impl Into<String>) -> Self {
        self.price = Some(price.into());
        self
    }

    #[must_use]
    pub fn time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = Some(time_in_force);
        self
    }

    #[must_use]
    pub fn position_side(mut self, position_side: PositionSide) -> Self {
        self.position_side = Some(position_side);
        self
    }

    #[must_use]
    pub fn reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = Some(reduce_only);
        self
    }

    #[must_use]
    pub fn stop_price(mut self, stop_price: impl Into<String>) -> Self {
        self.stop_price = Some(stop_price.into());
        self
    }

    #[must_use]
    pub fn close_position(mut self, close_position: bool) -> Self {
        self.close_position = Some(close_position);
        self
    }

    #[must_use]
    pub fn trailing(mut self, activation_price: impl Into<String>, callback_rate: impl Into<String>) -> Self {
        self.activation_price = Some(activation_price.into());
        self.callback_rate = Some(callback_rate.into());
        self
    }

    #[must_use]
    pub fn working_type(mut self, working_type: WorkingType) -> Self {
        self.working_type = Some(working_type);
        self
    }

    #[must_use]
    pub fn price_protect(mut self, price_protect: bool) -> Self {
        self.price_protect = Some(price_protect);
        self
    }

    #[must_use]
    pub fn client_order_id(mut self, id: impl Into<String>) -> Self {
        self.new_client_order_id = Some(id.into());
        self
    }

    /// Request params in the order the exchange documents them.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("side".to_string(), self.side.to_string()),
            ("type".to_string(), self.order_type.to_string()),
        ];
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                params.push((key.to_string(), value));
            }
        };
        push("positionSide", self.position_side.map(|v| v.to_string()));
        push("timeInForce", self.time_in_force.map(|v| v.to_string()));
        push("quantity", self.quantity.clone());
        push("reduceOnly", self.reduce_only.map(|v| v.to_string()));
        push("price", self.price.clone());
        push("newClientOrderId", self.new_client_order_id.clone());
        push("stopPrice", self.stop_price.clone());
        push("closePosition", self.close_position.map(|v| v.to_string()));
        push("activationPrice", self.activation_price.clone());
        push("callbackRate", self.callback_rate.clone());
        push("workingType", self.working_type.map(|v| v.to_string()));
        push("priceProtect", self.price_protect.map(|v| v.to_string().to_uppercase()));
        params
    }
}

/// Which order an order-scoped call refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    Id(i64),
    ClientId(String),
}

impl OrderRef {
    pub(crate) fn apply(&self, request: RestRequest) -> RestRequest {
        match self {
            Self::Id(id) => request.param("orderId", id),
            Self::ClientId(id) => request.param("origClientOrderId", id),
        }
    }
}

impl From<i64> for OrderRef {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

/// Optional paging/time filters shared by the history endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub from_id: Option<i64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<u32>,
}

impl HistoryFilter {
    pub fn limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn between(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    #[must_use]
    pub fn from_id(mut self, from_id: i64) -> Self {
        self.from_id = Some(from_id);
        self
    }

    pub(crate) fn apply(&self, request: RestRequest) -> RestRequest {
        request
            .optional_param("fromId", self.from_id)
            .optional_param("startTime", self.start_time)
            .optional_param("endTime", self.end_time)
            .optional_param("limit", self.limit)
    }
}
