use crate::core::errors::ExchangeError;
use crate::core::traits::{Callback, StreamSpec};
use crate::core::types::SubscriptionDescriptor;
use crate::exchanges::binance_coinm::types::{ContractType, Interval};

pub const DEPTH_LEVELS: [u8; 4] = [0, 5, 10, 20];
pub const DEPTH_FREQUENCIES_MS: [u16; 3] = [100, 250, 500];

/// Every COIN-M market and account data stream the client can subscribe to.
///
/// Symbols and pairs are given as the exchange lists them (`BTCUSD_PERP`,
/// `BTCUSD`) and lowercased in the channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoinMStream {
    AggregateTrade { symbol: String },
    IndexPrice { pair: String, every_second: bool },
    MarkPrice { symbol: String, every_second: bool },
    /// Mark price of every symbol.
    MarkPriceAll { every_second: bool },
    Candlestick { symbol: String, interval: Interval },
    ContinuousContractCandlestick {
        pair: String,
        contract_type: ContractType,
        interval: Interval,
    },
    IndexPriceCandlestick { pair: String, interval: Interval },
    MarkPriceCandlestick { symbol: String, interval: Interval },
    MiniTicker { symbol: String },
    AllMarketMiniTickers,
    Ticker { symbol: String },
    AllMarketTickers,
    BookTicker { symbol: String },
    AllBookTickers,
    Liquidations { symbol: String },
    AllMarketLiquidations,
    /// `level` 0 is the diff stream, 5/10/20 the partial book.
    Depth {
        symbol: String,
        level: u8,
        frequency_ms: Option<u16>,
    },
    /// User data events for the account behind `listen_key`.
    Account { listen_key: String },
}

impl CoinMStream {
    pub fn aggregate_trade(symbol: impl Into<String>) -> Self {
        Self::AggregateTrade {
            symbol: symbol.into(),
        }
    }

    pub fn mark_price(symbol: impl Into<String>, every_second: bool) -> Self {
        Self::MarkPrice {
            symbol: symbol.into(),
            every_second,
        }
    }

    pub fn candlestick(symbol: impl Into<String>, interval: Interval) -> Self {
        Self::Candlestick {
            symbol: symbol.into(),
            interval,
        }
    }

    pub fn depth(symbol: impl Into<String>, level: u8, frequency_ms: Option<u16>) -> Self {
        Self::Depth {
            symbol: symbol.into(),
            level,
            frequency_ms,
        }
    }

    pub fn account(listen_key: impl Into<String>) -> Self {
        Self::Account {
            listen_key: listen_key.into(),
        }
    }

    /// Attach handlers, producing a descriptor ready for `compose`.
    pub fn with_callbacks(self, callbacks: impl IntoIterator<Item = Callback>) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(self).with_callbacks(callbacks)
    }

    fn market(&self) -> Option<&str> {
        match self {
            Self::AggregateTrade { symbol }
            | Self::MarkPrice { symbol, .. }
            | Self::Candlestick { symbol, .. }
            | Self::MarkPriceCandlestick { symbol, .. }
            | Self::MiniTicker { symbol }
            | Self::Ticker { symbol }
            | Self::BookTicker { symbol }
            | Self::Liquidations { symbol }
            | Self::Depth { symbol, .. } => Some(symbol),
            Self::IndexPrice { pair, .. }
            | Self::ContinuousContractCandlestick { pair, .. }
            | Self::IndexPriceCandlestick { pair, .. } => Some(pair),
            Self::MarkPriceAll { .. }
            | Self::AllMarketMiniTickers
            | Self::AllMarketTickers
            | Self::AllBookTickers
            | Self::AllMarketLiquidations
            | Self::Account { .. } => None,
        }
    }
}

fn one_second(every_second: bool) -> &'static str {
    if every_second {
        "@1s"
    } else {
        ""
    }
}

impl StreamSpec for CoinMStream {
    fn channel_name(&self) -> String {
        let market = self.market().map(str::to_lowercase).unwrap_or_default();
        match self {
            Self::AggregateTrade { .. } => format!("{}@aggTrade", market),
            Self::IndexPrice { every_second, .. } => {
                format!("{}@indexPrice{}", market, one_second(*every_second))
            }
            Self::MarkPrice { every_second, .. } => {
                format!("{}@markPrice{}", market, one_second(*every_second))
            }
            Self::MarkPriceAll { every_second } => {
                format!("!markPrice@arr{}", one_second(*every_second))
            }
            Self::Candlestick { interval, .. } => format!("{}@kline_{}", market, interval),
            Self::ContinuousContractCandlestick {
                contract_type,
                interval,
                ..
            } => format!(
                "{}_{}@continuousKline_{}",
                market,
                contract_type.stream_name(),
                interval
            ),
            Self::IndexPriceCandlestick { interval, .. } => {
                format!("{}@indexPriceKline_{}", market, interval)
            }
            Self::MarkPriceCandlestick { interval, .. } => {
                format!("{}@markPriceKline_{}", market, interval)
            }
            Self::MiniTicker { .. } => format!("{}@miniTicker", market),
            Self::AllMarketMiniTickers => "!miniTicker@arr".to_string(),
            Self::Ticker { .. } => format!("{}@ticker", market),
            Self::AllMarketTickers => "!ticker@arr".to_string(),
            Self::BookTicker { .. } => format!("{}@bookTicker", market),
            Self::AllBookTickers => "!bookTicker".to_string(),
            Self::Liquidations { .. } => format!("{}@forceOrder", market),
            Self::AllMarketLiquidations => "!forceOrder@arr".to_string(),
            Self::Depth {
                level,
                frequency_ms,
                ..
            } => {
                let mut channel = format!("{}@depth", market);
                if *level != 0 {
                    channel.push_str(&level.to_string());
                }
                if let Some(frequency) = frequency_ms {
                    channel.push_str(&format!("@{}ms", frequency));
                }
                channel
            }
            // Case-sensitive; the envelope tags user events with the key itself.
            Self::Account { listen_key } => listen_key.clone(),
        }
    }

    fn validate(&self) -> Result<(), ExchangeError> {
        if let Some(market) = self.market() {
            if market.trim().is_empty() {
                return Err(ExchangeError::InvalidSubscription(format!(
                    "{:?}: symbol must not be empty",
                    self
                )));
            }
            if market.chars().any(|c| c.is_whitespace() || c == '@' || c == '/') {
                return Err(ExchangeError::InvalidSubscription(format!(
                    "{:?}: invalid symbol '{}'",
                    self, market
                )));
            }
        }

        if let Self::Account { listen_key } = self {
            if listen_key.is_empty()
                || listen_key.chars().any(|c| c.is_whitespace() || c == '@' || c == '/')
            {
                return Err(ExchangeError::InvalidSubscription(format!(
                    "invalid listen key '{}'",
                    listen_key
                )));
            }
        }

        if let Self::Depth {
            level,
            frequency_ms,
            ..
        } = self
        {
            if !DEPTH_LEVELS.contains(level) {
                return Err(ExchangeError::InvalidSubscription(format!(
                    "depth level {} not in {:?}",
                    level, DEPTH_LEVELS
                )));
            }
            if let Some(frequency) = frequency_ms {
                if !DEPTH_FREQUENCIES_MS.contains(frequency) {
                    return Err(ExchangeError::InvalidSubscription(format!(
                        "depth frequency {}ms not in {:?}",
                        frequency, DEPTH_FREQUENCIES_MS
                    )));
                }
            }
        }
        Ok(())
    }
}
