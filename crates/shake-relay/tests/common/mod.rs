#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shake_relay::access::HostResolver;
use shake_relay::config::RelayConfig;
use shake_relay::error::RelayError;
use shake_relay::event::{Event, EventLookup};
use shake_relay::listener::Listener;
use shake_relay::zone::{AftershockZoneQuery, ZoneCheck, ZoneRegistry, ZoneStore};
use shake_relay::RelayState;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub const ALLOWED_HOST: &str = "eew1.example.org";
pub const INTRUDER_IP: &str = "127.0.0.2";

pub struct StaticResolver;

#[async_trait]
impl HostResolver for StaticResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<String, RelayError> {
        match ip.to_string().as_str() {
            "127.0.0.1" => Ok(format!("{ALLOWED_HOST}.")),
            INTRUDER_IP => Ok("intruder.example.net".to_string()),
            other => Err(RelayError::Resolve(format!("no PTR record for {other}"))),
        }
    }
}

pub struct MapLookup(pub HashMap<String, Event>);

#[async_trait]
impl EventLookup for MapLookup {
    async fn lookup(&self, event_id: &str) -> Result<Option<Event>, RelayError> {
        Ok(self.0.get(event_id).cloned())
    }
}

/// In-memory zone store that records every definition.
pub struct RecordingZones {
    inner: ZoneStore,
    pub defined: Arc<Mutex<Vec<String>>>,
}

impl ZoneRegistry for RecordingZones {
    fn cleanup_expired(&mut self, magnitude_limit: f64) -> Result<usize, RelayError> {
        self.inner.cleanup_expired(magnitude_limit)
    }

    fn check(&self, query: &AftershockZoneQuery) -> ZoneCheck {
        self.inner.check(query)
    }

    fn define(&mut self, query: &AftershockZoneQuery) -> Result<(), RelayError> {
        self.defined.lock().unwrap().push(query.composite_id.clone());
        self.inner.define(query)
    }
}

pub fn event(id: &str, lat: f64, lon: f64, magnitude: f64, origin_time: DateTime<Utc>) -> Event {
    Event {
        network_id: "ci".to_string(),
        id: id.to_string(),
        lat,
        lon,
        magnitude,
        origin_time,
    }
}

/// The catalog used by the scenario tests.
pub fn catalog() -> HashMap<String, Event> {
    let now = Utc::now();
    let mut events = HashMap::new();
    events.insert(
        "12345".to_string(),
        event("12345", 32.7, -115.5, 6.0, now - chrono::Duration::minutes(20)),
    );
    events.insert(
        "12346".to_string(),
        event("12346", 35.0, -117.0, 7.0, now - chrono::Duration::minutes(10)),
    );
    events.insert(
        "12347".to_string(),
        event("12347", 35.1, -117.1, 4.0, now - chrono::Duration::minutes(5)),
    );
    events
}

pub fn test_config(queue_port: u16, threshold: f64) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.access.allowed_hosts = vec![ALLOWED_HOST.to_string()];
    config.aftershock.threshold = threshold;
    config.aftershock.magnitude_limit = 5.0;
    config.queue.host = "127.0.0.1".to_string();
    config.queue.port = queue_port;
    config.queue.timeout_s = 1;
    config
}

/// Fake downstream queue collecting one JSON record per connection.
pub async fn start_downstream() -> (u16, mpsc::UnboundedReceiver<Value>) {
    start_downstream_on(0).await
}

/// Same as [`start_downstream`] on a fixed port.
pub async fn start_downstream_on(port: u16) -> (u16, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut line = String::new();
            if stream.read_to_string(&mut line).await.is_ok() && !line.is_empty() {
                let _ = tx.send(serde_json::from_str(line.trim_end()).unwrap());
            }
        }
    });
    (port, rx)
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub struct TestRelay {
    pub addr: SocketAddr,
    pub records: mpsc::UnboundedReceiver<Value>,
    pub defined: Arc<Mutex<Vec<String>>>,
    pub zones_opened: Arc<AtomicBool>,
    pub shutdown: watch::Sender<()>,
    pub handle: JoinHandle<Result<(), RelayError>>,
}

impl TestRelay {
    pub async fn start(threshold: f64) -> Self {
        let (queue_port, records) = start_downstream().await;
        Self::start_with(test_config(queue_port, threshold), records).await
    }

    pub async fn start_with(
        config: RelayConfig,
        records: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        let defined = Arc::new(Mutex::new(Vec::new()));
        let zones_opened = Arc::new(AtomicBool::new(false));

        let mut state = RelayState::from_config(
            &config,
            Box::new(StaticResolver),
            Box::new(MapLookup(catalog())),
            {
                let defined = defined.clone();
                let zones_opened = zones_opened.clone();
                move || {
                    zones_opened.store(true, Ordering::SeqCst);
                    Ok(Box::new(RecordingZones {
                        inner: ZoneStore::in_memory(chrono::Duration::hours(72)),
                        defined,
                    }) as Box<dyn ZoneRegistry>)
                }
            },
        )
        .unwrap();
        state.accept_timeout = Duration::from_millis(100);
        state.read_timeout = Duration::from_millis(300);

        let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(shake_relay::run_with_shutdown(listener, state, shutdown_rx));

        Self {
            addr,
            records,
            defined,
            zones_opened,
            shutdown,
            handle,
        }
    }

    pub async fn next_record(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.records.recv())
            .await
            .expect("timeout waiting for downstream record")
            .expect("downstream closed")
    }

    pub async fn assert_no_record(&mut self, wait: Duration) {
        if let Ok(Some(record)) = tokio::time::timeout(wait, self.records.recv()).await {
            panic!("unexpected downstream record: {record}");
        }
    }

    pub fn defined(&self) -> Vec<String> {
        self.defined.lock().unwrap().clone()
    }
}

/// Send one message and wait for the relay to close the connection.
pub async fn send_line(addr: SocketAddr, line: &str) {
    let stream = TcpStream::connect(addr).await.unwrap();
    write_and_wait_close(stream, line).await;
}

/// Same as [`send_line`] but from a chosen loopback source address.
pub async fn send_line_from(source: &str, addr: SocketAddr, line: &str) {
    let socket = TcpSocket::new_v4().unwrap();
    socket
        .bind(format!("{source}:0").parse().unwrap())
        .unwrap();
    let stream = socket.connect(addr).await.unwrap();
    write_and_wait_close(stream, line).await;
}

async fn write_and_wait_close(mut stream: TcpStream, line: &str) {
    // The relay may close before reading; write errors are expected then.
    let _ = stream.write_all(line.as_bytes()).await;
    let _ = stream.shutdown().await;
    let mut buf = [0u8; 64];
    let closed = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await;
    assert!(closed.is_ok(), "relay did not close the connection");
}
