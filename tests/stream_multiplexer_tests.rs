use async_trait::async_trait;
use coinmx::core::errors::ExchangeError;
use coinmx::core::kernel::{
    HmacSigner, HttpRequest, HttpResponse, HttpTransport, MultiplexerConfig, RestClientBuilder,
    RestClientConfig, RestExecutor, SessionFactory, SubscriptionMultiplexer, WsConfig, WsSession,
};
use coinmx::core::traits::{handler_fn, Callback, StreamSpec};
use coinmx::core::types::{ConnectionState, StreamMessage};
use coinmx::exchanges::binance_coinm::{
    BinanceCoinMCodec, BinanceCoinMConnector, CoinMStream, Interval,
};
use serde_json::Value;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// What one mock socket has seen, shared with the test body.
#[derive(Default)]
struct SocketLog {
    connects: u32,
    /// Control frames sent, tagged with the connect generation they went out on.
    frames: Vec<(u32, Value)>,
    inbound: Option<mpsc::UnboundedSender<Message>>,
}

/// Shared state behind every `MockSession` the factory hands out.
#[derive(Default)]
struct MockHub {
    sockets: Mutex<Vec<SocketLog>>,
    failing_connects: Mutex<u32>,
}

impl MockHub {
    fn factory(self: &Arc<Self>) -> SessionFactory<MockSession> {
        let hub = self.clone();
        Arc::new(move || {
            let mut sockets = hub.sockets.lock().unwrap();
            sockets.push(SocketLog::default());
            MockSession {
                index: sockets.len() - 1,
                hub: hub.clone(),
                inbound: None,
            }
        })
    }

    fn session_count(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    fn connects(&self, index: usize) -> u32 {
        self.sockets.lock().unwrap()[index].connects
    }

    fn frames(&self, index: usize) -> Vec<(u32, Value)> {
        self.sockets.lock().unwrap()[index].frames.clone()
    }

    fn frames_with_method(&self, index: usize, method: &str) -> Vec<(u32, Value)> {
        self.frames(index)
            .into_iter()
            .filter(|(_, frame)| frame["method"] == method)
            .collect()
    }

    fn push(&self, index: usize, text: &str) {
        let sockets = self.sockets.lock().unwrap();
        let sender = sockets[index].inbound.as_ref().expect("socket is not open");
        sender.send(Message::Text(text.to_string())).unwrap();
    }

    /// Simulate the server dropping the socket.
    fn drop_socket(&self, index: usize) {
        self.sockets.lock().unwrap()[index].inbound = None;
    }

    fn fail_next_connects(&self, count: u32) {
        *self.failing_connects.lock().unwrap() = count;
    }
}

struct MockSession {
    index: usize,
    hub: Arc<MockHub>,
    inbound: Option<mpsc::UnboundedReceiver<Message>>,
}

#[async_trait]
impl WsSession for MockSession {
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        {
            let mut failing = self.hub.failing_connects.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ExchangeError::TransportError("connection refused".to_string()));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sockets = self.hub.sockets.lock().unwrap();
        let socket = &mut sockets[self.index];
        socket.connects += 1;
        socket.inbound = Some(tx);
        self.inbound = Some(rx);
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if self.inbound.is_none() {
            return Err(ExchangeError::ConnectionClosed("not connected".to_string()));
        }
        if let Message::Text(text) = msg {
            let frame: Value = serde_json::from_str(&text)?;
            let mut sockets = self.hub.sockets.lock().unwrap();
            let socket = &mut sockets[self.index];
            let generation = socket.connects;
            socket.frames.push((generation, frame));
        }
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        match self.inbound.as_mut() {
            Some(rx) => rx.recv().await.map(Ok),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.inbound = None;
        self.hub.sockets.lock().unwrap()[self.index].inbound = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inbound.is_some()
    }
}

fn test_config() -> MultiplexerConfig {
    MultiplexerConfig::new("binance_coinm").with_ws_config(
        WsConfig::default()
            .with_reconnect_backoff(5, 20, 2.0)
            .with_control_frames_per_second(NonZeroU32::new(1000).unwrap()),
    )
}

fn multiplexer(hub: &Arc<MockHub>, config: MultiplexerConfig) -> SubscriptionMultiplexer<MockSession> {
    SubscriptionMultiplexer::new(config, Arc::new(BinanceCoinMCodec), hub.factory())
}

type Received = Arc<Mutex<Vec<String>>>;

/// Callback that logs `<tag>:<data>` for every message.
fn recorder(tag: &'static str, log: &Received) -> Callback {
    let log = log.clone();
    handler_fn(move |message: StreamMessage| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(format!("{}:{}", tag, message.data));
        }
    })
}

/// Poll `$cond` (which may `.await`) until it holds or two seconds pass.
macro_rules! eventually {
    ($what:expr, $cond:expr) => {{
        let mut satisfied = false;
        for _ in 0..400 {
            if $cond {
                satisfied = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(satisfied, "timed out waiting for {}", $what);
    }};
}

fn data_frame(channel: &str, data: &str) -> String {
    format!(r#"{{"stream":"{channel}","data":{data}}}"#)
}

#[tokio::test]
async fn test_duplicate_descriptors_share_one_subscription() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, test_config());
    let log = Received::default();

    let stream = CoinMStream::aggregate_trade("BTCUSD_PERP");
    let added = mux
        .compose(vec![
            stream.clone().with_callbacks([recorder("a", &log)]),
            stream.clone().with_callbacks([recorder("b", &log)]),
        ])
        .await
        .unwrap();
    assert_eq!(added, vec!["btcusd_perp@aggTrade".to_string()]);

    eventually!("subscribe frame", !hub.frames(0).is_empty());
    hub.push(0, &data_frame("btcusd_perp@aggTrade", "1"));
    eventually!("both callbacks", log.lock().unwrap().len() == 2);

    assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1"]);
    let subscribes = hub.frames_with_method(0, "SUBSCRIBE");
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0].1["params"], serde_json::json!(["btcusd_perp@aggTrade"]));
    assert_eq!(mux.router().handler_count("btcusd_perp@aggTrade"), 2);
    mux.close().await;
}

#[tokio::test]
async fn test_compose_is_additive() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, test_config());
    let log = Received::default();

    mux.compose(vec![CoinMStream::aggregate_trade("BTCUSD_PERP").with_callbacks([recorder("first", &log)])])
        .await
        .unwrap();
    let added = mux
        .compose(vec![
            CoinMStream::aggregate_trade("BTCUSD_PERP").with_callbacks([recorder("second", &log)]),
            CoinMStream::candlestick("BTCUSD_PERP", Interval::OneMinute).with_callbacks([]),
        ])
        .await
        .unwrap();
    assert_eq!(added, vec!["btcusd_perp@kline_1m".to_string()]);

    assert_eq!(
        mux.channels().await,
        vec!["btcusd_perp@aggTrade".to_string(), "btcusd_perp@kline_1m".to_string()]
    );
    eventually!("two subscribe frames", hub.frames_with_method(0, "SUBSCRIBE").len() == 2);

    hub.push(0, &data_frame("btcusd_perp@aggTrade", "7"));
    eventually!("merged callbacks", log.lock().unwrap().len() == 2);
    assert_eq!(*log.lock().unwrap(), vec!["first:7", "second:7"]);
    assert_eq!(hub.session_count(), 1);
    mux.close().await;
}

#[tokio::test]
async fn test_channels_are_partitioned_across_connections() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, test_config().with_max_streams_per_connection(2));

    let symbols = ["BTCUSD_PERP", "ETHUSD_PERP", "BNBUSD_PERP", "ADAUSD_PERP", "DOTUSD_PERP"];
    let descriptors = symbols
        .iter()
        .map(|s| CoinMStream::aggregate_trade(*s).with_callbacks([]))
        .collect();
    let added = mux.compose(descriptors).await.unwrap();
    assert_eq!(added.len(), 5);
    assert_eq!(mux.connection_count().await, 3);

    let partitions = mux.connection_channels().await;
    let mut seen = HashSet::new();
    for partition in &partitions {
        assert!(partition.len() <= 2);
        for channel in partition {
            assert!(seen.insert(channel.clone()), "{channel} assigned twice");
        }
    }
    assert_eq!(seen.len(), 5);

    for (index, partition) in partitions.iter().enumerate() {
        eventually!(
            "partition subscribed",
            hub.frames_with_method(index, "SUBSCRIBE").len() == partition.len()
        );
        let sent: HashSet<String> = hub
            .frames_with_method(index, "SUBSCRIBE")
            .iter()
            .flat_map(|(_, frame)| frame["params"].as_array().cloned().unwrap_or_default())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        assert_eq!(sent, partition.iter().cloned().collect::<HashSet<_>>());
    }
    mux.close().await;
}

#[tokio::test]
async fn test_reconnect_resubscribes_only_active_channels() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, test_config());

    let streams = vec![
        CoinMStream::aggregate_trade("BTCUSD_PERP"),
        CoinMStream::mark_price("BTCUSD_PERP", true),
        CoinMStream::depth("BTCUSD_PERP", 5, Some(100)),
        CoinMStream::candlestick("BTCUSD_PERP", Interval::FiveMinutes),
    ];
    mux.compose(streams.iter().cloned().map(|s| s.with_callbacks([])).collect())
        .await
        .unwrap();
    eventually!("initial subscribes", hub.frames_with_method(0, "SUBSCRIBE").len() == 4);

    let removed = streams[1].channel_name();
    mux.unsubscribe(&[removed.clone()]).await.unwrap();
    eventually!("unsubscribe frame", hub.frames_with_method(0, "UNSUBSCRIBE").len() == 1);

    hub.drop_socket(0);
    eventually!("reconnect", hub.connects(0) == 2);
    eventually!(
        "resubscribe frames",
        hub.frames_with_method(0, "SUBSCRIBE")
            .iter()
            .filter(|(generation, _)| *generation == 2)
            .count()
            == 3
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let replayed: Vec<String> = hub
        .frames_with_method(0, "SUBSCRIBE")
        .into_iter()
        .filter(|(generation, _)| *generation == 2)
        .flat_map(|(_, frame)| frame["params"].as_array().cloned().unwrap_or_default())
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    assert_eq!(replayed.len(), 3);
    assert!(!replayed.contains(&removed));

    let mut expected = mux.channels().await;
    let mut replayed_sorted = replayed.clone();
    replayed_sorted.sort();
    expected.sort();
    assert_eq!(replayed_sorted, expected);

    let stats = mux.stats().await;
    assert_eq!(stats[0].connects, 2);
    assert!(stats[0].reconnect_attempts >= 1);
    assert_eq!(mux.connection_states().await, vec![ConnectionState::Open]);
    mux.close().await;
}

#[tokio::test]
async fn test_invalid_descriptor_rejects_whole_batch() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, test_config());

    let err = mux
        .compose(vec![
            CoinMStream::aggregate_trade("BTCUSD_PERP").with_callbacks([]),
            CoinMStream::depth("BTCUSD_PERP", 7, None).with_callbacks([]),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::InvalidSubscription(_)));
    assert_eq!(hub.session_count(), 0);
    assert!(mux.channels().await.is_empty());
    assert!(mux.router().channels().is_empty());
}

#[tokio::test]
async fn test_failed_connects_are_retried() {
    let hub = Arc::new(MockHub::default());
    hub.fail_next_connects(2);
    let mux = multiplexer(&hub, test_config());

    mux.compose(vec![CoinMStream::AllBookTickers.with_callbacks([])])
        .await
        .unwrap();

    eventually!("connected", hub.connects(0) == 1);
    eventually!("subscribed", !hub.frames(0).is_empty());
    let stats = mux.stats().await;
    assert!(stats[0].reconnect_attempts >= 2);
    assert_eq!(hub.frames_with_method(0, "SUBSCRIBE").len(), 1);
    mux.close().await;
}

#[tokio::test]
async fn test_close_stops_reconnecting() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, test_config());

    mux.compose(vec![CoinMStream::AllMarketTickers.with_callbacks([])])
        .await
        .unwrap();
    eventually!("connected", hub.connects(0) == 1);

    mux.close().await;
    assert!(mux.is_closed().await);
    assert!(mux.channels().await.is_empty());
    assert_eq!(hub.connects(0), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.connects(0), 1);

    let err = mux
        .compose(vec![CoinMStream::AllMarketTickers.with_callbacks([])])
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::ConnectionClosed(_)));
}

#[tokio::test]
async fn test_close_interrupts_backoff() {
    let hub = Arc::new(MockHub::default());
    hub.fail_next_connects(u32::MAX);
    let config = MultiplexerConfig::new("binance_coinm").with_ws_config(
        WsConfig::default().with_reconnect_backoff(60_000, 60_000, 1.0),
    );
    let mux = multiplexer(&hub, config);

    mux.compose(vec![CoinMStream::AllMarketLiquidations.with_callbacks([])])
        .await
        .unwrap();
    eventually!("first failed attempt", mux.stats().await[0].reconnect_attempts >= 1);

    tokio::time::timeout(Duration::from_secs(2), mux.close())
        .await
        .expect("close should not wait for the backoff");
    assert_eq!(hub.connects(0), 0);
}

#[tokio::test]
async fn test_slow_channel_does_not_stall_others() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, test_config());
    let log = Received::default();

    let slow = {
        let log = log.clone();
        handler_fn(move |message: StreamMessage| {
            let log = log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                log.lock().unwrap().push(format!("slow:{}", message.data));
            }
        })
    };

    mux.compose(vec![
        CoinMStream::aggregate_trade("BTCUSD_PERP").with_callbacks([slow]),
        CoinMStream::aggregate_trade("ETHUSD_PERP").with_callbacks([recorder("fast", &log)]),
    ])
    .await
    .unwrap();
    eventually!("subscribed", hub.frames_with_method(0, "SUBSCRIBE").len() == 2);

    hub.push(0, &data_frame("btcusd_perp@aggTrade", "1"));
    hub.push(0, &data_frame("btcusd_perp@aggTrade", "2"));
    hub.push(0, &data_frame("ethusd_perp@aggTrade", "1"));
    hub.push(0, &data_frame("btcusd_perp@aggTrade", "3"));

    eventually!("all messages", log.lock().unwrap().len() == 4);
    let log = log.lock().unwrap().clone();
    assert_eq!(log[0], "fast:1");
    let slow_order: Vec<&String> = log.iter().filter(|entry| entry.starts_with("slow")).collect();
    assert_eq!(slow_order, vec!["slow:1", "slow:2", "slow:3"]);
    mux.close().await;
}

#[tokio::test]
async fn test_server_errors_and_routing_misses_are_counted() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, test_config());

    mux.compose(vec![CoinMStream::aggregate_trade("BTCUSD_PERP").with_callbacks([])])
        .await
        .unwrap();
    eventually!("subscribed", !hub.frames(0).is_empty());

    hub.push(0, r#"{"result":null,"id":1}"#);
    hub.push(0, r#"{"error":{"code":2,"msg":"Invalid request: unknown stream"},"id":2}"#);
    hub.push(0, &data_frame("ethusd_perp@aggTrade", "{}"));

    eventually!("frames processed", mux.stats().await[0].frames_received == 3);
    let stats = mux.stats().await;
    assert_eq!(stats[0].server_errors, 1);
    assert_eq!(mux.routing_misses(), 1);
    // Still open: neither frame tears the connection down.
    assert_eq!(hub.connects(0), 1);
    mux.close().await;
}

fn many_agg_trades(count: usize) -> Vec<CoinMStream> {
    (0..count)
        .map(|i| CoinMStream::aggregate_trade(format!("C{i}USD_PERP")))
        .collect()
}

#[tokio::test]
async fn test_data_flows_while_subscribe_frames_drain() {
    let hub = Arc::new(MockHub::default());
    // Default control-frame rate: a burst of 5, then one frame every 200ms.
    let mux = multiplexer(&hub, MultiplexerConfig::new("binance_coinm"));
    let log = Received::default();

    let streams = many_agg_trades(12);
    let first = streams[0].channel_name();
    let mut descriptors = vec![streams[0].clone().with_callbacks([recorder("first", &log)])];
    descriptors.extend(streams[1..].iter().cloned().map(|s| s.with_callbacks([])));
    mux.compose(descriptors).await.unwrap();

    eventually!("first subscribe", !hub.frames_with_method(0, "SUBSCRIBE").is_empty());
    hub.push(0, &data_frame(&first, "1"));
    eventually!("first message", log.lock().unwrap().len() == 1);
    assert!(
        hub.frames_with_method(0, "SUBSCRIBE").len() < 12,
        "message was held back until every subscribe went out"
    );

    eventually!("all subscribes", hub.frames_with_method(0, "SUBSCRIBE").len() == 12);
    mux.close().await;
}

#[tokio::test]
async fn test_unsubscribe_drops_queued_subscribe() {
    let hub = Arc::new(MockHub::default());
    let mux = multiplexer(&hub, MultiplexerConfig::new("binance_coinm"));

    let streams = many_agg_trades(8);
    let last = streams[7].channel_name();
    mux.compose(streams.iter().cloned().map(|s| s.with_callbacks([])).collect())
        .await
        .unwrap();
    mux.unsubscribe(&[last.clone()]).await.unwrap();

    eventually!("remaining subscribes", hub.frames_with_method(0, "SUBSCRIBE").len() == 7);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let subscribes = hub.frames_with_method(0, "SUBSCRIBE");
    assert_eq!(subscribes.len(), 7);
    assert!(subscribes
        .iter()
        .all(|(_, frame)| frame["params"] != serde_json::json!([last.clone()])));
    assert!(hub.frames_with_method(0, "UNSUBSCRIBE").is_empty());
    mux.close().await;
}

const LISTEN_KEY: &str = "pqia91ma19a5s61cv6a81va65sdf19v8a65a1a5s61cv6a81va65sdf19v8a65a1";

/// Answers the listen key endpoints and records `METHOD path` per call.
#[derive(Default)]
struct ListenKeyTransport {
    calls: Mutex<Vec<String>>,
}

impl ListenKeyTransport {
    fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(method))
            .count()
    }
}

#[async_trait]
impl HttpTransport for ListenKeyTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError> {
        let path = request.url.trim_start_matches("https://dapi.test").to_string();
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", request.method.as_str(), path));
        Ok(HttpResponse::new(200, format!(r#"{{"listenKey":"{LISTEN_KEY}"}}"#)))
    }
}

fn keyed_executor(transport: Arc<ListenKeyTransport>) -> RestExecutor {
    let config = RestClientConfig::new("https://dapi.test".to_string(), "binance_coinm".to_string());
    RestClientBuilder::new(config)
        .with_transport(transport)
        .with_signer(Arc::new(HmacSigner::new("api-key", "secret-key")))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_account_stream_routes_user_data_and_keeps_key_alive() {
    let hub = Arc::new(MockHub::default());
    let transport = Arc::new(ListenKeyTransport::default());
    let connector = BinanceCoinMConnector::new(keyed_executor(transport.clone()), multiplexer(&hub, test_config()))
        .with_listen_key_keepalive(Duration::from_millis(40));
    let log = Received::default();

    let listen_key = connector
        .start_user_data_stream([recorder("account", &log)])
        .await
        .unwrap();
    assert_eq!(listen_key, LISTEN_KEY);
    assert_eq!(connector.user_data_listen_key().as_deref(), Some(LISTEN_KEY));
    assert_eq!(transport.count("POST /dapi/v1/listenKey"), 1);

    eventually!("account subscribe", !hub.frames_with_method(0, "SUBSCRIBE").is_empty());
    let subscribes = hub.frames_with_method(0, "SUBSCRIBE");
    assert_eq!(subscribes[0].1["params"], serde_json::json!([LISTEN_KEY]));

    hub.push(0, &data_frame(LISTEN_KEY, r#"{"e":"ACCOUNT_UPDATE","E":1}"#));
    eventually!("user data event", log.lock().unwrap().len() == 1);
    assert!(log.lock().unwrap()[0].starts_with("account:"));
    assert!(log.lock().unwrap()[0].contains("ACCOUNT_UPDATE"));

    eventually!("keep-alive", transport.count("PUT /dapi/v1/listenKey") >= 2);

    connector.stop_user_data_stream().await.unwrap();
    assert_eq!(transport.count("DELETE /dapi/v1/listenKey"), 1);
    assert!(connector.user_data_listen_key().is_none());
    eventually!("account unsubscribe", hub.frames_with_method(0, "UNSUBSCRIBE").len() == 1);

    let refreshed = transport.count("PUT");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.count("PUT"), refreshed);
    connector.close().await;
}

#[tokio::test]
async fn test_close_stops_listen_key_refresh() {
    let hub = Arc::new(MockHub::default());
    let transport = Arc::new(ListenKeyTransport::default());
    let connector = BinanceCoinMConnector::new(keyed_executor(transport.clone()), multiplexer(&hub, test_config()))
        .with_listen_key_keepalive(Duration::from_millis(20));

    connector.start_user_data_stream([]).await.unwrap();
    eventually!("keep-alive", transport.count("PUT") >= 1);

    connector.close().await;
    let refreshed = transport.count("PUT");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.count("PUT"), refreshed);
    assert!(connector.user_data_listen_key().is_none());
}
