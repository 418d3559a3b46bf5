use anyhow::Context;
use coinmx::core::kernel::RestResponse;
use coinmx::exchanges::binance_coinm::{build_connector, CoinMStream, Interval};
use coinmx::{handler_fn, ExchangeConfig, StreamMessage};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Credentials are optional here; public endpoints and streams need none.
    let config = ExchangeConfig::from_env("BINANCE_COINM")
        .unwrap_or_else(|_| ExchangeConfig::read_only().testnet(true));
    let connector = build_connector(config).context("building connector")?;

    let response: RestResponse = connector.rest.get_time().await.context("server time")?;
    info!(body = %response.body, "server time");

    let response = connector
        .rest
        .get_order_book("BTCUSD_PERP", Some(5))
        .await
        .context("order book")?;
    info!(body = %response.body, "order book");

    let print = handler_fn(|message: StreamMessage| async move {
        info!(stream = %message.stream, data = %message.data, "update");
    });
    let added = connector
        .compose_subscriptions(vec![
            CoinMStream::aggregate_trade("BTCUSD_PERP").with_callbacks([print.clone()]),
            CoinMStream::candlestick("BTCUSD_PERP", Interval::OneMinute).with_callbacks([print.clone()]),
        ])
        .await
        .context("subscribing")?;
    info!(?added, "subscribed");

    if connector.rest.inner().has_signer() {
        let listen_key = connector
            .start_user_data_stream([print])
            .await
            .context("user data stream")?;
        info!(%listen_key, "user data stream open");
    }

    tokio::time::sleep(Duration::from_secs(10)).await;
    connector.close().await;
    Ok(())
}
