use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, ConnectionError, Event, MqttOptions};
use rumqttc::Transport;

/// Message broker carrying serialised alerts.
pub trait Broker: Send + Sync {
    /// Declare a durable exchange before first use.
    fn declare_exchange(&self, exchange: &str) -> Result<()>;

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }
    let remainder = remainder.trim_end_matches('/');

    let (host, port) = split_host_port(remainder, if use_tls { 8883 } else { 1883 })?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port.parse().context("invalid MQTT port")?,
            None => default_port,
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().context("invalid MQTT port")?;
            Ok((host.to_string(), port))
        }
        None if !addr.is_empty() => Ok((addr.to_string(), default_port)),
        None => Err(anyhow!("missing MQTT host")),
    }
}

/// MQTT topic for an exchange/routing-key pair; empty parts are dropped.
pub fn topic_for(exchange: &str, routing_key: &str) -> String {
    [exchange, routing_key]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

const REQUEST_QUEUE: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const STOP_POLL: Duration = Duration::from_millis(50);
const DROP_GRACE: Duration = Duration::from_secs(2);

/// MQTT-backed broker. Exchange and routing key map onto the topic path.
///
/// Publishing never blocks: a full request queue (broker unreachable) is a
/// failed publish. The connection thread retries until the broker is dropped.
pub struct MqttBroker {
    client: Client,
    stopping: Arc<AtomicBool>,
    connection_handle: Option<thread::JoinHandle<()>>,
}

impl MqttBroker {
    pub fn connect(
        url: &str,
        client_id: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(url)?;
        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = username {
            options.set_credentials(user, password.unwrap_or_default());
        }
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut connection) = Client::new(options, REQUEST_QUEUE);
        let stopping = Arc::new(AtomicBool::new(false));
        let stop_flag = stopping.clone();
        let label = client_id.to_string();
        let handle = thread::Builder::new()
            .name(format!("mqtt-{}", client_id))
            .spawn(move || {
                for event in connection.iter() {
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    match event {
                        Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                        Err(ConnectionError::RequestsDone) => break,
                        Err(e) => {
                            log::warn!("[{}] MQTT connection error: {}", label, e);
                            if sleep_unless_stopped(&stop_flag, RECONNECT_DELAY) {
                                break;
                            }
                        }
                    }
                }
            })
            .context("failed to spawn MQTT connection thread")?;
        log::info!(
            "MQTT broker {}:{} configured for {} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            client_id,
            endpoint.use_tls,
            username.is_some()
        );
        Ok(Self {
            client,
            stopping,
            connection_handle: Some(handle),
        })
    }
}

/// Sleep up to `delay`; true if a stop was requested meanwhile.
fn sleep_unless_stopped(stopping: &AtomicBool, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if stopping.load(Ordering::SeqCst) {
            return true;
        }
        thread::sleep(STOP_POLL);
    }
    stopping.load(Ordering::SeqCst)
}

impl Broker for MqttBroker {
    fn declare_exchange(&self, exchange: &str) -> Result<()> {
        // Topics need no declaration; retained only as a trace point.
        log::debug!("MQTT exchange '{}' maps to a topic prefix", exchange);
        Ok(())
    }

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let topic = topic_for(exchange, routing_key);
        if topic.is_empty() {
            bail!("no exchange or routing key to publish to");
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .context("MQTT publish failed (request queue full or client closed)")?;
        Ok(())
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.client.try_disconnect();
        let Some(handle) = self.connection_handle.take() else {
            return;
        };
        let deadline = Instant::now() + DROP_GRACE;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(STOP_POLL);
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            // Blocked in a network call; it exits at its next event.
            log::debug!("MQTT connection thread still busy; detaching");
        }
    }
}

/// One message accepted by `MemoryBroker`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Messages a `MemoryBroker` retains by default; older ones are discarded.
pub const MEMORY_BROKER_HISTORY: usize = 256;

#[derive(Default)]
struct MemoryState {
    declared: BTreeSet<String>,
    published: VecDeque<PublishedMessage>,
    attempts: usize,
}

/// In-process broker keeping the most recent messages.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
    history: usize,
    fail: bool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::with_history(MEMORY_BROKER_HISTORY)
    }
}

impl MemoryBroker {
    /// Broker retaining at most `history` messages (at least one).
    pub fn with_history(history: usize) -> Self {
        Self {
            state: Arc::default(),
            history: history.max(1),
            fail: false,
        }
    }

    /// A broker whose publish always fails, still counting attempts.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.iter().cloned().collect()
    }

    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn is_declared(&self, exchange: &str) -> bool {
        self.lock().declared.contains(exchange)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Broker for MemoryBroker {
    fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.lock().declared.insert(exchange.to_string());
        Ok(())
    }

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.attempts += 1;
        if self.fail {
            bail!("broker unavailable");
        }
        if !exchange.is_empty() && !state.declared.contains(exchange) {
            bail!("exchange '{}' was not declared", exchange);
        }
        if state.published.len() >= self.history {
            state.published.pop_front();
        }
        state.published.push_back(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
