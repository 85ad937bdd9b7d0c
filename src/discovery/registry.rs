// Registry of live fabric peers
//
// Continuously refreshed by an mDNS browse loop, pruned by TTL, fanned
// out to subscribers as added/updated/removed events. Readers get an
// atomically swapped copy-on-write snapshot; a full subscriber channel
// loses events rather than stalling the registry.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo as MdnsServiceInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    Event, EventType, ServerInfo, ServerKind, DEFAULT_DOMAIN, DEFAULT_ENTRY_TTL,
    DEFAULT_PRUNE_INTERVAL, DEFAULT_SERVICE,
};

/// Runtime knobs for the registry. Empty / zero fields fall back to the
/// fabric defaults.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub service: String,
    pub domain: String,
    pub entry_ttl: Duration,
    pub prune_interval: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            entry_ttl: DEFAULT_ENTRY_TTL,
            prune_interval: DEFAULT_PRUNE_INTERVAL,
        }
    }
}

impl RegistryOptions {
    fn with_defaults(mut self) -> Self {
        if self.service.trim().is_empty() {
            self.service = DEFAULT_SERVICE.to_string();
        }
        if self.domain.trim().is_empty() {
            self.domain = DEFAULT_DOMAIN.to_string();
        }
        if self.entry_ttl.is_zero() {
            self.entry_ttl = DEFAULT_ENTRY_TTL;
        }
        if self.prune_interval.is_zero() {
            self.prune_interval = DEFAULT_PRUNE_INTERVAL;
        }
        self
    }

    /// Full browse label, e.g. `_mcp-http._tcp.local.`
    fn type_domain(&self) -> String {
        format!("{}.{}", self.service, self.domain)
    }
}

/// A single resolved sighting of a peer, decoupled from the mDNS wire
/// types. The browse loop produces these; tests and alternative
/// transports may feed them directly.
#[derive(Debug, Clone)]
pub struct Observation {
    pub instance: String,
    pub host: String,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
    pub text: HashMap<String, String>,
}

/// Bounded event stream handed to a subscriber. Dropped or unsubscribed
/// streams are detached from the registry; when the registry stops, every
/// stream ends.
pub struct EventStream {
    id: u64,
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Next event, or `None` once the registry has stopped or this
    /// stream was unsubscribed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

struct State {
    // Copy-on-write map behind an atomically swapped Arc. Writers replace
    // the whole Arc under the write lock; readers clone the Arc and walk
    // it without blocking writers.
    snapshot: RwLock<Arc<HashMap<String, ServerInfo>>>,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<Event>>>,
    next_subscriber: AtomicU64,
    entry_ttl: chrono::Duration,
}

/// Maintains the continuously refreshed snapshot of visible MCP servers.
pub struct Registry {
    opts: RegistryOptions,
    state: Arc<State>,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Registry {
    pub fn new(opts: RegistryOptions) -> Self {
        let opts = opts.with_defaults();
        let entry_ttl = chrono::Duration::from_std(opts.entry_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_ENTRY_TTL.as_secs() as i64));
        Self {
            opts,
            state: Arc::new(State {
                snapshot: RwLock::new(Arc::new(HashMap::new())),
                subscribers: RwLock::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
                entry_ttl,
            }),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Launch the browse and prune loops. Call once per process; a second
    /// call is an error, as is failure to create the mDNS daemon.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            bail!("registry already started");
        }

        let daemon = ServiceDaemon::new().context("create mDNS daemon")?;
        let type_domain = self.opts.type_domain();
        let receiver = daemon
            .browse(&type_domain)
            .with_context(|| format!("browse {type_domain}"))?;

        tracing::info!(service = %type_domain, "mDNS browse started");

        let mut tasks = self.tasks.lock().unwrap();

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let browse_type = type_domain.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv_async() => match event {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            state.observe(Observation::from_resolved(&info, &browse_type));
                        }
                        // Goodbye packets are advisory; staleness is
                        // decided by the TTL sweep alone.
                        Ok(_) => {}
                        Err(_) => break,
                    },
                }
            }
            let _ = daemon.stop_browse(&browse_type);
            let _ = daemon.shutdown();
        }));

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let prune_interval = self.opts.prune_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + prune_interval, prune_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => state.prune_stale(Utc::now()),
                }
            }
        }));

        Ok(())
    }

    /// Cancel both loops, wait for them to exit, then close every
    /// subscriber stream.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.state.subscribers.write().unwrap().clear();
    }

    /// Owned copy of the current peer map, safe to retain and iterate.
    pub fn snapshot(&self) -> HashMap<String, ServerInfo> {
        let current = Arc::clone(&self.state.snapshot.read().unwrap());
        current.as_ref().clone()
    }

    /// Register a bounded event sink. A buffer of zero is coerced to one.
    pub fn subscribe(&self, buffer: usize) -> EventStream {
        let buffer = buffer.max(1);
        let (tx, rx) = mpsc::channel(buffer);
        let id = self.state.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.state.subscribers.write().unwrap().insert(id, tx);
        EventStream { id, rx }
    }

    /// Detach and close a subscriber stream.
    pub fn unsubscribe(&self, stream: EventStream) {
        self.state.subscribers.write().unwrap().remove(&stream.id);
    }

    /// Record a sighting of a peer. The browse loop feeds this from
    /// resolved mDNS entries.
    pub fn observe(&self, observation: Observation) {
        self.state.observe(observation);
    }

    #[cfg(test)]
    pub(crate) fn prune_stale(&self, now: DateTime<Utc>) {
        self.state.prune_stale(now);
    }
}

impl State {
    fn observe(&self, observation: Observation) {
        let role = observation
            .text
            .get("role")
            .map(String::as_str)
            .unwrap_or_default();
        let info = ServerInfo {
            address: preferred_address(&observation),
            kind: ServerKind::classify(role),
            instance: observation.instance,
            host: observation.host,
            port: observation.port,
            last_seen: Utc::now(),
            text: observation.text,
        };

        // Swap the snapshot first, then broadcast, all inside the writer
        // critical section: a snapshot taken after the event was enqueued
        // always reflects that event.
        let mut guard = self.snapshot.write().unwrap();
        let existed = guard.contains_key(&info.instance);
        let mut next = guard.as_ref().clone();
        next.insert(info.instance.clone(), info.clone());
        *guard = Arc::new(next);

        let event_type = if existed {
            EventType::Updated
        } else {
            EventType::Added
        };
        tracing::debug!(
            instance = %info.instance,
            kind = %info.kind,
            address = %info.address,
            ?event_type,
            "peer observed"
        );
        self.broadcast(Event {
            event_type,
            server: info,
        });
    }

    fn prune_stale(&self, now: DateTime<Utc>) {
        let threshold = now - self.entry_ttl;

        let mut guard = self.snapshot.write().unwrap();
        if guard.is_empty() {
            return;
        }
        let stale: Vec<ServerInfo> = guard
            .values()
            .filter(|info| info.last_seen < threshold)
            .cloned()
            .collect();
        if stale.is_empty() {
            return;
        }

        let mut next = guard.as_ref().clone();
        for info in &stale {
            next.remove(&info.instance);
        }
        *guard = Arc::new(next);

        for info in stale {
            tracing::info!(instance = %info.instance, kind = %info.kind, "peer expired");
            self.broadcast(Event {
                event_type: EventType::Removed,
                server: info,
            });
        }
    }

    fn broadcast(&self, event: Event) {
        let subscribers = self.subscribers.read().unwrap();
        for tx in subscribers.values() {
            // A full subscriber loses the event; the registry never
            // blocks on fan-out.
            let _ = tx.try_send(event.clone());
        }
    }
}

impl Observation {
    fn from_resolved(info: &MdnsServiceInfo, type_domain: &str) -> Self {
        // Value-less TXT records are malformed under the fabric's k=v
        // contract and are dropped.
        let text = info
            .get_properties()
            .iter()
            .filter_map(|prop| {
                prop.val().map(|val| {
                    (
                        prop.key().to_string(),
                        String::from_utf8_lossy(val).into_owned(),
                    )
                })
            })
            .collect();
        Self {
            instance: instance_from_fullname(info.get_fullname(), type_domain),
            host: info.get_hostname().to_string(),
            port: info.get_port(),
            addresses: info.get_addresses().iter().copied().collect(),
            text,
        }
    }
}

/// `host:port` with the first IPv4 address preferred, then IPv6, then the
/// bare hostname.
fn preferred_address(observation: &Observation) -> String {
    let ip = observation
        .addresses
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| observation.addresses.iter().find(|addr| addr.is_ipv6()));
    match ip {
        Some(ip) => SocketAddr::new(*ip, observation.port).to_string(),
        None => format!(
            "{}:{}",
            observation.host.trim_end_matches('.'),
            observation.port
        ),
    }
}

/// Strip `.<service>.<domain>` from an mDNS fullname to recover the
/// instance label.
fn instance_from_fullname(fullname: &str, type_domain: &str) -> String {
    fullname
        .strip_suffix(type_domain)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fullname)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn observation(instance: &str) -> Observation {
        Observation {
            instance: instance.to_string(),
            host: format!("{instance}.local."),
            port: 8080,
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10))],
            text: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_observe_emits_added_and_updates_snapshot() {
        let registry = Registry::new(RegistryOptions::default());
        let mut events = registry.subscribe(4);

        registry.observe(observation("alpha"));

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.server.instance, "alpha");
        // The snapshot taken after the event reflects it.
        assert!(registry.snapshot().contains_key("alpha"));
    }

    #[tokio::test]
    async fn test_second_observation_emits_updated() {
        let registry = Registry::new(RegistryOptions::default());
        let mut events = registry.subscribe(4);

        registry.observe(observation("alpha"));
        registry.observe(observation("alpha"));

        assert_eq!(events.recv().await.unwrap().event_type, EventType::Added);
        assert_eq!(events.recv().await.unwrap().event_type, EventType::Updated);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_peer_pruned_with_removed_event() {
        let registry = Registry::new(RegistryOptions::default());
        registry.observe(observation("x"));
        let mut events = registry.subscribe(4);

        // Sixty seconds with no refresh exceeds the 45 s TTL.
        registry.prune_stale(Utc::now() + chrono::Duration::seconds(60));

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Removed);
        assert_eq!(event.server.instance, "x");
        assert!(!registry.snapshot().contains_key("x"));
    }

    #[tokio::test]
    async fn test_fresh_peer_survives_prune() {
        let registry = Registry::new(RegistryOptions::default());
        registry.observe(observation("alpha"));

        registry.prune_stale(Utc::now());

        assert!(registry.snapshot().contains_key("alpha"));
    }

    #[tokio::test]
    async fn test_removed_peer_can_return() {
        let registry = Registry::new(RegistryOptions::default());
        let mut events = registry.subscribe(8);

        registry.observe(observation("alpha"));
        registry.prune_stale(Utc::now() + chrono::Duration::seconds(60));
        registry.observe(observation("alpha"));

        let kinds: Vec<EventType> = [
            events.recv().await.unwrap().event_type,
            events.recv().await.unwrap().event_type,
            events.recv().await.unwrap().event_type,
        ]
        .to_vec();
        assert_eq!(
            kinds,
            vec![EventType::Added, EventType::Removed, EventType::Added]
        );
        assert!(registry.snapshot().contains_key("alpha"));
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_events_without_blocking() {
        let registry = Registry::new(RegistryOptions::default());
        let mut events = registry.subscribe(1);

        for i in 0..5 {
            registry.observe(observation(&format!("peer-{i}")));
        }

        let mut received = 0;
        while events.try_recv().is_some() {
            received += 1;
        }
        assert!(received >= 1, "at least one event must get through");
        assert!(received < 5, "a buffer of one cannot hold the whole burst");
        // The registry itself saw everything.
        assert_eq!(registry.snapshot().len(), 5);
    }

    #[tokio::test]
    async fn test_zero_buffer_coerced_to_one() {
        let registry = Registry::new(RegistryOptions::default());
        let mut events = registry.subscribe(0);

        registry.observe(observation("alpha"));
        assert!(events.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_unsubscribed_stream_receives_nothing_more() {
        let registry = Registry::new(RegistryOptions::default());
        let events = registry.subscribe(4);
        registry.unsubscribe(events);

        // No subscriber left; this must not panic or block.
        registry.observe(observation("alpha"));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_subscriber_streams() {
        let registry = Registry::new(RegistryOptions::default());
        let mut events = registry.subscribe(4);

        registry.stop().await;

        assert!(events.recv().await.is_none());
    }

    #[test]
    fn test_snapshot_is_a_detached_copy() {
        let registry = Registry::new(RegistryOptions::default());
        registry.observe(observation("alpha"));

        let mut copy = registry.snapshot();
        copy.remove("alpha");

        assert!(registry.snapshot().contains_key("alpha"));
    }

    #[test]
    fn test_kind_classified_from_role_record() {
        let registry = Registry::new(RegistryOptions::default());
        let mut obs = observation("alpha");
        obs.text.insert("role".to_string(), "Agent-Wrapper".to_string());
        registry.observe(obs);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["alpha"].kind, ServerKind::AgentWrapper);
    }

    #[test]
    fn test_preferred_address_ipv4_first() {
        let mut obs = observation("alpha");
        obs.addresses = vec![
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        ];
        assert_eq!(preferred_address(&obs), "10.0.0.2:8080");
    }

    #[test]
    fn test_preferred_address_ipv6_bracketed() {
        let mut obs = observation("alpha");
        obs.addresses = vec![IpAddr::V6(Ipv6Addr::LOCALHOST)];
        assert_eq!(preferred_address(&obs), "[::1]:8080");
    }

    #[test]
    fn test_preferred_address_falls_back_to_hostname() {
        let mut obs = observation("alpha");
        obs.addresses.clear();
        assert_eq!(preferred_address(&obs), "alpha.local:8080");
    }

    #[test]
    fn test_instance_from_fullname() {
        assert_eq!(
            instance_from_fullname("alpha._mcp-http._tcp.local.", "_mcp-http._tcp.local."),
            "alpha"
        );
        // Unexpected shapes pass through untouched.
        assert_eq!(
            instance_from_fullname("alpha", "_mcp-http._tcp.local."),
            "alpha"
        );
    }

    #[test]
    fn test_options_with_defaults_fills_blanks() {
        let opts = RegistryOptions {
            service: String::new(),
            domain: "  ".to_string(),
            entry_ttl: Duration::ZERO,
            prune_interval: Duration::ZERO,
        }
        .with_defaults();
        assert_eq!(opts.service, DEFAULT_SERVICE);
        assert_eq!(opts.domain, DEFAULT_DOMAIN);
        assert_eq!(opts.entry_ttl, DEFAULT_ENTRY_TTL);
        assert_eq!(opts.prune_interval, DEFAULT_PRUNE_INTERVAL);
        assert_eq!(opts.type_domain(), "_mcp-http._tcp.local.");
    }
}
