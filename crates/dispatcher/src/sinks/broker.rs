//! BrokerSink - publishes readings to an MQTT broker
//!
//! One message per channel value, under `base_topic/<channel>`. While the
//! broker is unreachable, messages accumulate in a bounded replay buffer
//! (oldest dropped first on overflow) and are published in original order
//! once the connection returns. The connection itself is maintained by a
//! background event-loop task with bounded exponential reconnect delay.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use contracts::{ContractError, DataSink, DeviceDescriptor, Reading};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

/// One encoded MQTT message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BrokerMessage {
    pub topic: String,
    pub payload: String,
}

/// Bounded FIFO of unpublished messages; overflow sheds the oldest entry.
pub(crate) struct ReplayBuffer {
    queue: VecDeque<BrokerMessage>,
    capacity: usize,
}

impl ReplayBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a message, returning the evicted oldest one if full.
    pub(crate) fn push(&mut self, message: BrokerMessage) -> Option<BrokerMessage> {
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(message);
        evicted
    }

    pub(crate) fn pop_front(&mut self) -> Option<BrokerMessage> {
        self.queue.pop_front()
    }

    /// Put a message back at the head after a failed publish, keeping the
    /// original order for the next drain attempt.
    pub(crate) fn push_front(&mut self, message: BrokerMessage) {
        self.queue.push_front(message);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Configuration for BrokerSink
#[derive(Debug, Clone)]
pub struct BrokerSinkConfig {
    /// Broker host list; only the first entry is dialed, the rest are
    /// accepted for config compatibility
    pub hosts: Vec<(String, u16)>,
    /// Optional authentication
    pub username: Option<String>,
    pub password: Option<String>,
    /// Replay buffer bound
    pub buffer_capacity: usize,
    /// First reconnect delay
    pub reconnect_min: Duration,
    /// Reconnect delay ceiling
    pub reconnect_max: Duration,
}

impl BrokerSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let hosts_raw = params
            .get("hosts")
            .ok_or_else(|| "missing 'hosts' parameter".to_string())?;
        let hosts = parse_hosts(hosts_raw)?;

        let buffer_capacity = params
            .get("buffer_capacity")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);
        let reconnect_min = params
            .get("reconnect_min_ms")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(1));
        let reconnect_max = params
            .get("reconnect_max_ms")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            hosts,
            username: params.get("username").cloned(),
            password: params.get("password").cloned(),
            buffer_capacity,
            reconnect_min,
            reconnect_max,
        })
    }
}

/// Parse "host[:port][,host[:port]...]", defaulting to port 1883.
fn parse_hosts(raw: &str) -> Result<Vec<(String, u16)>, String> {
    let mut hosts = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| format!("invalid port in '{entry}'"))?;
                hosts.push((host.to_string(), if port == 0 { 1883 } else { port }));
            }
            None => hosts.push((entry.to_string(), 1883)),
        }
    }
    if hosts.is_empty() {
        return Err("no broker hosts given".to_string());
    }
    Ok(hosts)
}

/// Per-channel topics, resolved once from the descriptors.
fn build_topic_map(devices: &[DeviceDescriptor]) -> HashMap<String, Vec<String>> {
    devices
        .iter()
        .map(|d| {
            let topics = (0..d.column_names.len()).map(|i| d.channel_topic(i)).collect();
            (d.id.clone(), topics)
        })
        .collect()
}

/// One message per channel value, self-describing payload.
pub(crate) fn encode_reading(
    topics: &HashMap<String, Vec<String>>,
    reading: &Reading,
) -> Vec<BrokerMessage> {
    let device_topics = topics.get(reading.device_id.as_str());
    reading
        .values
        .iter()
        .enumerate()
        .map(|(channel, value)| {
            let topic = device_topics
                .and_then(|t| t.get(channel).cloned())
                .unwrap_or_else(|| format!("{}/{}", reading.device_id, channel));
            let payload = serde_json::json!({
                "timestamp": reading.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                "device_id": reading.device_id.as_str(),
                "seq": reading.seq,
                "channel": channel,
                "value": value,
            })
            .to_string();
            BrokerMessage { topic, payload }
        })
        .collect()
}

/// Sink that publishes readings to an MQTT broker.
pub struct BrokerSink {
    name: String,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    buffer: ReplayBuffer,
    topics: HashMap<String, Vec<String>>,
    event_loop_task: JoinHandle<()>,
}

impl BrokerSink {
    /// Create a new BrokerSink and start its connection task. Construction
    /// never blocks on the broker; connectivity is reported by the event
    /// loop as it happens.
    pub fn new(
        name: impl Into<String>,
        config: BrokerSinkConfig,
        devices: &[DeviceDescriptor],
    ) -> Result<Self, String> {
        let name = name.into();
        let (host, port) = config
            .hosts
            .first()
            .cloned()
            .ok_or_else(|| "no broker hosts given".to_string())?;
        if config.hosts.len() > 1 {
            warn!(
                sink = %name,
                "multiple broker hosts configured, only the first is used"
            );
        }

        let mut options = MqttOptions::new(format!("lablogger-{name}"), host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));
        let event_loop_task = spawn_event_loop(
            event_loop,
            Arc::clone(&connected),
            name.clone(),
            config.reconnect_min,
            config.reconnect_max,
        );

        Ok(Self {
            name,
            client,
            connected,
            buffer: ReplayBuffer::new(config.buffer_capacity),
            topics: build_topic_map(devices),
            event_loop_task,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
        devices: &[DeviceDescriptor],
    ) -> Result<Self, String> {
        let config = BrokerSinkConfig::from_params(params)?;
        Self::new(name, config, devices)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn publish(&self, message: &BrokerMessage) -> Result<(), ContractError> {
        self.client
            .publish(
                message.topic.clone(),
                QoS::AtLeastOnce,
                false,
                message.payload.clone().into_bytes(),
            )
            .await
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))
    }

    /// Replay buffered messages in original order; stops at the first
    /// failure, leaving the remainder for the next attempt.
    async fn drain_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let backlog = self.buffer.len();
        while let Some(message) = self.buffer.pop_front() {
            if let Err(e) = self.publish(&message).await {
                debug!(sink = %self.name, error = %e, "replay interrupted");
                self.buffer.push_front(message);
                return;
            }
        }
        info!(sink = %self.name, replayed = backlog, "replayed buffered messages");
    }

    fn buffer_message(&mut self, message: BrokerMessage) {
        if let Some(evicted) = self.buffer.push(message) {
            warn!(
                sink = %self.name,
                topic = %evicted.topic,
                "replay buffer full, oldest message dropped"
            );
        }
    }
}

/// Drive the MQTT event loop, tracking connectivity and pacing reconnects.
fn spawn_event_loop(
    mut event_loop: rumqttc::EventLoop,
    connected: Arc<AtomicBool>,
    name: String,
    reconnect_min: Duration,
    reconnect_max: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = reconnect_min;
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(sink = %name, "broker connected");
                    connected.store(true, Ordering::Relaxed);
                    delay = reconnect_min;
                }
                Ok(event) => {
                    trace!(sink = %name, ?event, "mqtt event");
                }
                Err(e) => {
                    if connected.swap(false, Ordering::Relaxed) {
                        warn!(sink = %name, error = %e, "broker connection lost");
                    } else {
                        debug!(sink = %name, error = %e, "broker unreachable");
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(reconnect_max);
                }
            }
        }
    })
}

impl DataSink for BrokerSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "broker_sink_write",
        skip(self, reading),
        fields(sink = %self.name, device = %reading.device_id)
    )]
    async fn write(&mut self, reading: &Reading) -> Result<(), ContractError> {
        let messages = encode_reading(&self.topics, reading);

        if !self.is_connected() {
            for message in messages {
                self.buffer_message(message);
            }
            return Ok(());
        }

        // backlog first, to keep per-device order intact
        self.drain_buffer().await;
        for message in messages {
            if self.is_connected() && self.buffer.is_empty() {
                if let Err(e) = self.publish(&message).await {
                    debug!(sink = %self.name, error = %e, "publish failed, buffering");
                    self.buffer_message(message);
                }
            } else {
                self.buffer_message(message);
            }
        }
        Ok(())
    }

    #[instrument(name = "broker_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        if self.is_connected() {
            self.drain_buffer().await;
        }
        Ok(())
    }

    #[instrument(name = "broker_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if self.is_connected() {
            self.drain_buffer().await;
        }
        if !self.buffer.is_empty() {
            warn!(
                sink = %self.name,
                unsent = self.buffer.len(),
                "closing with unsent messages"
            );
        }
        let _ = self.client.try_disconnect();
        self.event_loop_task.abort();
        debug!(sink = %self.name, "broker sink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::{ConnectionParams, DriverKind, Value};

    fn message(n: u64) -> BrokerMessage {
        BrokerMessage {
            topic: format!("t/{n}"),
            payload: n.to_string(),
        }
    }

    #[test]
    fn test_replay_buffer_keeps_order() {
        let mut buffer = ReplayBuffer::new(10);
        for n in 0..5 {
            assert!(buffer.push(message(n)).is_none());
        }
        let drained: Vec<String> = std::iter::from_fn(|| buffer.pop_front())
            .map(|m| m.payload)
            .collect();
        assert_eq!(drained, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_replay_buffer_overflow_drops_oldest() {
        let mut buffer = ReplayBuffer::new(3);
        for n in 0..5 {
            buffer.push(message(n));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.pop_front().unwrap().payload, "2");
    }

    #[test]
    fn test_replay_buffer_push_front_restores_head() {
        let mut buffer = ReplayBuffer::new(3);
        buffer.push(message(1));
        let head = buffer.pop_front().unwrap();
        buffer.push_front(head);
        assert_eq!(buffer.pop_front().unwrap().payload, "1");
    }

    #[test]
    fn test_parse_hosts_defaults_port() {
        let hosts = parse_hosts("broker.lab.example, 10.0.0.2:8883").unwrap();
        assert_eq!(
            hosts,
            vec![
                ("broker.lab.example".to_string(), 1883),
                ("10.0.0.2".to_string(), 8883)
            ]
        );
    }

    #[test]
    fn test_parse_hosts_rejects_garbage_port() {
        assert!(parse_hosts("broker:notaport").is_err());
        assert!(parse_hosts("").is_err());
    }

    #[test]
    fn test_encode_reading_uses_channel_topics() {
        let device = DeviceDescriptor {
            id: "tec0".into(),
            driver: DriverKind::Mock,
            connection: ConnectionParams::default(),
            poll_interval_ms: 1000,
            initial_commands: vec![],
            read_commands: vec!["A?".into(), "B?".into()],
            post_read_commands: vec![],
            column_names: vec!["temperature".into(), "tec_current".into()],
            base_topic: "sensors/lab/tec0".into(),
            channel_topics: vec!["temperature".into(), "tec_current".into()],
            failure_threshold: None,
        };
        let topics = build_topic_map(std::slice::from_ref(&device));

        let reading = Reading {
            device_id: "tec0".into(),
            seq: 4,
            timestamp: Utc::now(),
            monotonic: std::time::Duration::from_secs(1),
            values: vec![Value::Number(25.5), Value::Number(0.75)],
        };
        let messages = encode_reading(&topics, &reading);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "sensors/lab/tec0/temperature");
        assert_eq!(messages[1].topic, "sensors/lab/tec0/tec_current");

        let payload: serde_json::Value = serde_json::from_str(&messages[1].payload).unwrap();
        assert_eq!(payload["device_id"], "tec0");
        assert_eq!(payload["seq"], 4);
        assert_eq!(payload["channel"], 1);
        assert_eq!(payload["value"], 0.75);
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn test_encode_reading_unknown_device_falls_back() {
        let reading = Reading {
            device_id: "ghost".into(),
            seq: 0,
            timestamp: Utc::now(),
            monotonic: std::time::Duration::ZERO,
            values: vec![Value::Number(1.0)],
        };
        let messages = encode_reading(&HashMap::new(), &reading);
        assert_eq!(messages[0].topic, "ghost/0");
    }
}
