use crate::core::errors::ExchangeError;
use crate::core::kernel::{RestClient, RestRequest, RestResponse};
use crate::exchanges::binance_coinm::types::{
    ContractType, HistoryFilter, Interval, MarginChange, MarginType, NewOrder, OrderRef,
    PositionSide, StatsPeriod,
};
use tracing::instrument;

pub const TIME_ENDPOINT: &str = "/dapi/v1/time";

/// Weight of `GET /dapi/v1/depth` for a given limit.
pub fn depth_weight(limit: Option<u32>) -> u32 {
    match limit.unwrap_or(500) {
        0..=50 => 2,
        51..=100 => 5,
        101..=500 => 10,
        _ => 20,
    }
}

/// Weight of the candlestick endpoints for a given limit.
pub fn kline_weight(limit: Option<u32>) -> u32 {
    match limit.unwrap_or(500) {
        0..=99 => 1,
        100..=499 => 2,
        500..=1000 => 5,
        _ => 10,
    }
}

/// Typed endpoint wrappers over a [`RestClient`].
///
/// Every method builds one [`RestRequest`] with the endpoint's weight and
/// returns the raw [`RestResponse`]; payload shapes are left to the caller.
#[derive(Clone)]
pub struct BinanceCoinMRestClient<R: RestClient> {
    rest: R,
}

impl<R: RestClient> BinanceCoinMRestClient<R> {
    /// Create a new REST client wrapper
    pub fn new(rest: R) -> Self {
        Self { rest }
    }

    pub fn inner(&self) -> &R {
        &self.rest
    }

    async fn call(&self, request: RestRequest) -> Result<RestResponse, ExchangeError> {
        self.rest.execute(request).await
    }

    // ---- market data ----

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn ping(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::get("/dapi/v1/ping")).await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_time(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::get(TIME_ENDPOINT)).await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_exchange_info(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::get("/dapi/v1/exchangeInfo")).await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_order_book(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v1/depth")
                .param("symbol", symbol)
                .optional_param("limit", limit)
                .weight(depth_weight(limit)),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_trades(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v1/trades")
                .param("symbol", symbol)
                .optional_param("limit", limit)
                .weight(5),
        )
        .await
    }

    /// Needs the API key header.
    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_historical_trades(
        &self,
        symbol: &str,
        limit: Option<u32>,
        from_id: Option<i64>,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v1/historicalTrades")
                .param("symbol", symbol)
                .optional_param("limit", limit)
                .optional_param("fromId", from_id)
                .keyed()
                .weight(20),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_aggregate_trades(
        &self,
        symbol: &str,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter.apply(RestRequest::get("/dapi/v1/aggTrades").param("symbol", symbol)).weight(20),
        )
        .await
    }

    /// Premium index and mark price, for one symbol, one pair or everything.
    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_mark_index_price(
        &self,
        symbol: Option<&str>,
        pair: Option<&str>,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v1/premiumIndex")
                .optional_param("symbol", symbol)
                .optional_param("pair", pair)
                .weight(10),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_funding_rate_history(
        &self,
        symbol: &str,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(filter.apply(RestRequest::get("/dapi/v1/fundingRate").param("symbol", symbol)))
            .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol, interval = %interval))]
    pub async fn get_candlesticks(
        &self,
        symbol: &str,
        interval: Interval,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/klines")
                        .param("symbol", symbol)
                        .param("interval", interval),
                )
                .weight(kline_weight(filter.limit)),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", pair = %pair, interval = %interval))]
    pub async fn get_cont_contract_candlesticks(
        &self,
        pair: &str,
        contract_type: ContractType,
        interval: Interval,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/continuousKlines")
                        .param("pair", pair)
                        .param("contractType", contract_type)
                        .param("interval", interval),
                )
                .weight(kline_weight(filter.limit)),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", pair = %pair, interval = %interval))]
    pub async fn get_index_price_candlesticks(
        &self,
        pair: &str,
        interval: Interval,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/indexPriceKlines")
                        .param("pair", pair)
                        .param("interval", interval),
                )
                .weight(kline_weight(filter.limit)),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol, interval = %interval))]
    pub async fn get_mark_price_candlesticks(
        &self,
        symbol: &str,
        interval: Interval,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/markPriceKlines")
                        .param("symbol", symbol)
                        .param("interval", interval),
                )
                .weight(kline_weight(filter.limit)),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_24h_price_ticker(
        &self,
        symbol: Option<&str>,
        pair: Option<&str>,
    ) -> Result<RestResponse, ExchangeError> {
        let weight = if symbol.is_some() || pair.is_some() { 1 } else { 40 };
        self.call(
            RestRequest::get("/dapi/v1/ticker/24hr")
                .optional_param("symbol", symbol)
                .optional_param("pair", pair)
                .weight(weight),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_price_ticker(
        &self,
        symbol: Option<&str>,
        pair: Option<&str>,
    ) -> Result<RestResponse, ExchangeError> {
        let weight = if symbol.is_some() || pair.is_some() { 1 } else { 2 };
        self.call(
            RestRequest::get("/dapi/v1/ticker/price")
                .optional_param("symbol", symbol)
                .optional_param("pair", pair)
                .weight(weight),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_orderbook_ticker(
        &self,
        symbol: Option<&str>,
        pair: Option<&str>,
    ) -> Result<RestResponse, ExchangeError> {
        let weight = if symbol.is_some() || pair.is_some() { 2 } else { 5 };
        self.call(
            RestRequest::get("/dapi/v1/ticker/bookTicker")
                .optional_param("symbol", symbol)
                .optional_param("pair", pair)
                .weight(weight),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_open_interest(&self, symbol: &str) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::get("/dapi/v1/openInterest").param("symbol", symbol))
            .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", pair = %pair))]
    pub async fn get_open_interest_hist(
        &self,
        pair: &str,
        contract_type: ContractType,
        period: StatsPeriod,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter.apply(
                RestRequest::get("/futures/data/openInterestHist")
                    .param("pair", pair)
                    .param("contractType", contract_type)
                    .param("period", period),
            ),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", pair = %pair))]
    pub async fn get_top_long_short_account_ratio(
        &self,
        pair: &str,
        period: StatsPeriod,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter.apply(
                RestRequest::get("/futures/data/topLongShortAccountRatio")
                    .param("pair", pair)
                    .param("period", period),
            ),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", pair = %pair))]
    pub async fn get_top_long_short_position_ratio(
        &self,
        pair: &str,
        period: StatsPeriod,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter.apply(
                RestRequest::get("/futures/data/topLongShortPositionRatio")
                    .param("pair", pair)
                    .param("period", period),
            ),
        )
        .await
    }

    // ---- account and trading ----

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_position_type(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::get("/dapi/v1/positionSide/dual").signed().weight(30))
            .await
    }

    /// Switch between hedge mode (`true`) and one-way mode.
    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn change_position_type(
        &self,
        dual_side_position: bool,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::post("/dapi/v1/positionSide/dual")
                .param("dualSidePosition", dual_side_position)
                .signed(),
        )
        .await
    }

    #[instrument(skip(self, order), fields(exchange = "binance_coinm", symbol = %order.symbol, side = %order.side))]
    pub async fn create_order(&self, order: &NewOrder) -> Result<RestResponse, ExchangeError> {
        let mut request = RestRequest::post("/dapi/v1/order").signed().order();
        request.params = order.params();
        self.call(request).await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_order(
        &self,
        symbol: &str,
        order: OrderRef,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(order.apply(RestRequest::get("/dapi/v1/order").param("symbol", symbol)).signed())
            .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order: OrderRef,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            order
                .apply(RestRequest::delete("/dapi/v1/order").param("symbol", symbol))
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::delete("/dapi/v1/allOpenOrders")
                .param("symbol", symbol)
                .signed(),
        )
        .await
    }

    /// Arm (or with 0, disarm) the dead-man switch for `symbol`.
    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn auto_cancel_orders(
        &self,
        symbol: &str,
        countdown_time_ms: u64,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::post("/dapi/v1/countdownCancelAll")
                .param("symbol", symbol)
                .param("countdownTime", countdown_time_ms)
                .signed()
                .weight(10),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_open_order(
        &self,
        symbol: &str,
        order: OrderRef,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            order
                .apply(RestRequest::get("/dapi/v1/openOrder").param("symbol", symbol))
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_all_open_orders(
        &self,
        symbol: Option<&str>,
        pair: Option<&str>,
    ) -> Result<RestResponse, ExchangeError> {
        let weight = if symbol.is_some() { 1 } else { 40 };
        self.call(
            RestRequest::get("/dapi/v1/openOrders")
                .optional_param("symbol", symbol)
                .optional_param("pair", pair)
                .signed()
                .weight(weight),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_all_orders(
        &self,
        symbol: Option<&str>,
        pair: Option<&str>,
        order_id: Option<i64>,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        if symbol.is_none() && pair.is_none() {
            return Err(ExchangeError::InvalidParameters(
                "either symbol or pair is required".to_string(),
            ));
        }
        let weight = if symbol.is_some() { 20 } else { 40 };
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/allOrders")
                        .optional_param("symbol", symbol)
                        .optional_param("pair", pair)
                        .optional_param("orderId", order_id),
                )
                .signed()
                .weight(weight),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_balance(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::get("/dapi/v1/balance").signed())
            .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_account(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::get("/dapi/v1/account").signed().weight(5))
            .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn change_init_leverage(
        &self,
        symbol: &str,
        leverage: u32,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::post("/dapi/v1/leverage")
                .param("symbol", symbol)
                .param("leverage", leverage)
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol, margin_type = %margin_type))]
    pub async fn change_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::post("/dapi/v1/marginType")
                .param("symbol", symbol)
                .param("marginType", margin_type)
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn update_isolated_position_margin(
        &self,
        symbol: &str,
        amount: &str,
        change: MarginChange,
        position_side: Option<PositionSide>,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::post("/dapi/v1/positionMargin")
                .param("symbol", symbol)
                .optional_param("positionSide", position_side)
                .param("amount", amount)
                .param("type", change)
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_position_margin_change_history(
        &self,
        symbol: &str,
        change: Option<MarginChange>,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/positionMargin/history")
                        .param("symbol", symbol)
                        .optional_param("type", change),
                )
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_position(
        &self,
        margin_asset: Option<&str>,
        pair: Option<&str>,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v1/positionRisk")
                .optional_param("marginAsset", margin_asset)
                .optional_param("pair", pair)
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_account_trades(
        &self,
        symbol: Option<&str>,
        pair: Option<&str>,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        if symbol.is_none() && pair.is_none() {
            return Err(ExchangeError::InvalidParameters(
                "either symbol or pair is required".to_string(),
            ));
        }
        let weight = if symbol.is_some() { 20 } else { 40 };
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/userTrades")
                        .optional_param("symbol", symbol)
                        .optional_param("pair", pair),
                )
                .signed()
                .weight(weight),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_income_history(
        &self,
        symbol: Option<&str>,
        income_type: Option<&str>,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/income")
                        .optional_param("symbol", symbol)
                        .optional_param("incomeType", income_type),
                )
                .signed()
                .weight(20),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_notional_and_leverage_brackets(
        &self,
        symbol: Option<&str>,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v2/leverageBracket")
                .optional_param("symbol", symbol)
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_notional_and_leverage_brackets_for_pair(
        &self,
        pair: Option<&str>,
    ) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v1/leverageBracket")
                .optional_param("pair", pair)
                .signed(),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_adl_quantile(&self, symbol: Option<&str>) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v1/adlQuantile")
                .optional_param("symbol", symbol)
                .signed()
                .weight(5),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn get_force_orders(
        &self,
        symbol: Option<&str>,
        auto_close_type: Option<&str>,
        filter: HistoryFilter,
    ) -> Result<RestResponse, ExchangeError> {
        let weight = if symbol.is_some() { 20 } else { 50 };
        self.call(
            filter
                .apply(
                    RestRequest::get("/dapi/v1/forceOrders")
                        .optional_param("symbol", symbol)
                        .optional_param("autoCloseType", auto_close_type),
                )
                .signed()
                .weight(weight),
        )
        .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm", symbol = %symbol))]
    pub async fn get_commission_rate(&self, symbol: &str) -> Result<RestResponse, ExchangeError> {
        self.call(
            RestRequest::get("/dapi/v1/commissionRate")
                .param("symbol", symbol)
                .signed()
                .weight(20),
        )
        .await
    }

    // ---- user data stream keys ----

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn create_listen_key(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::post("/dapi/v1/listenKey").keyed())
            .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn keep_alive_listen_key(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::put("/dapi/v1/listenKey").keyed())
            .await
    }

    #[instrument(skip(self), fields(exchange = "binance_coinm"))]
    pub async fn close_listen_key(&self) -> Result<RestResponse, ExchangeError> {
        self.call(RestRequest::delete("/dapi/v1/listenKey").keyed())
            .await
    }
}
