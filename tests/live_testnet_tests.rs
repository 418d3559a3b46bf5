//! Live checks against the COIN-M testnet.
//!
//! Skipped unless `RUN_LIVE_TESTS=true`. Signed checks additionally need
//! `BINANCE_COINM_API_KEY` / `BINANCE_COINM_SECRET_KEY` for a testnet account.

use coinmx::core::config::ExchangeConfig;
use coinmx::core::errors::ExchangeError;
use coinmx::core::traits::handler_fn;
use coinmx::core::types::StreamMessage;
use coinmx::exchanges::binance_coinm::{build_connector, CoinMStream, OrderRef};
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SYMBOL: &str = "BTCUSD_PERP";

fn should_run_live_tests() -> bool {
    env::var("RUN_LIVE_TESTS").unwrap_or_default() == "true"
}

fn public_config() -> ExchangeConfig {
    ExchangeConfig::read_only().testnet(true)
}

fn signed_config() -> Option<ExchangeConfig> {
    ExchangeConfig::from_env("BINANCE_COINM")
        .ok()
        .map(|config| config.testnet(true))
}

#[tokio::test]
async fn test_live_public_endpoints() {
    if !should_run_live_tests() {
        println!("⚠️  Skipping live test (set RUN_LIVE_TESTS=true)");
        return;
    }

    let connector = build_connector(public_config()).unwrap();
    connector.rest.ping().await.unwrap();

    let time = connector.rest.get_time().await.unwrap();
    assert!(time.body["serverTime"].as_i64().unwrap() > 0);

    let book = connector.rest.get_order_book(SYMBOL, Some(5)).await.unwrap();
    assert!(book.body["bids"].is_array());

    let offset = connector.sync_server_time().await.unwrap();
    println!("✅ clock offset {offset}ms");
}

#[tokio::test]
async fn test_live_unknown_order_codes() {
    if !should_run_live_tests() {
        println!("⚠️  Skipping live test (set RUN_LIVE_TESTS=true)");
        return;
    }
    let Some(config) = signed_config() else {
        println!("⚠️  Skipping signed live test (no credentials)");
        return;
    };

    let connector = build_connector(config).unwrap();

    let err = connector
        .rest
        .cancel_order(SYMBOL, OrderRef::Id(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::ApiError { .. }));
    assert_eq!(err.status_code(), Some(400));
    assert_eq!(err.code(), Some(-2011));

    let err = connector
        .rest
        .get_order(SYMBOL, OrderRef::Id(1))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert_eq!(err.code(), Some(-2013));
}

#[tokio::test]
async fn test_live_stream_delivers_updates() {
    if !should_run_live_tests() {
        println!("⚠️  Skipping live test (set RUN_LIVE_TESTS=true)");
        return;
    }

    let connector = build_connector(public_config()).unwrap();
    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    let callback = handler_fn(move |message: StreamMessage| {
        let counter = counter.clone();
        async move {
            assert_eq!(message.stream, "btcusd_perp@markPrice@1s");
            counter.fetch_add(1, Ordering::Relaxed);
        }
    });

    connector
        .compose_subscriptions(vec![
            CoinMStream::mark_price(SYMBOL, true).with_callbacks([callback])
        ])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    connector.close().await;
    assert!(received.load(Ordering::Relaxed) > 0);
}
