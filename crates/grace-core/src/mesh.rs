//! Declarative pub/sub event mesh. Routes are data (`RouteRule`), subscribers
//! register a pattern and receive a clone of every matching `Event`. Delivery is in-process,
//! per-source FIFO to a given subscriber, with bounded per-subscriber parallelism.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub priority: Priority,
    pub audit: bool,
    pub alert: bool,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            payload,
            priority: Priority::Normal,
            audit: false,
            alert: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_alert(mut self, alert: bool) -> Self {
        self.alert = alert;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub event_pattern: String,
    pub subscribers: Vec<String>,
    pub priority_override: Option<Priority>,
    pub audit_required: bool,
    pub alert_required: bool,
}

/// Matches a dotted glob pattern (`component.*`, `unified_logic.handshake_*`) against a
/// dotted event type. `*` matches exactly one segment; no regex engine needed for this
/// narrow grammar.
pub fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    let pattern_segs: Vec<&str> = pattern.split('.').collect();
    let type_segs: Vec<&str> = event_type.split('.').collect();
    if pattern_segs.len() != type_segs.len() {
        return false;
    }
    pattern_segs
        .iter()
        .zip(type_segs.iter())
        .all(|(p, t)| *p == "*" || p == t)
}

type Handler = Arc<dyn Fn(Event) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync>;

struct Subscription {
    id: String,
    pattern: String,
    tx: mpsc::Sender<Event>,
}

pub struct EventMesh {
    routes: DashMap<String, RouteRule>,
    subscriptions: DashMap<String, Subscription>,
    history: Mutex<VecDeque<Event>>,
    history_cap: usize,
    sequence: AtomicU64,
    alert_sinks: RwLock<Vec<Handler>>,
    audit_sink: Option<Arc<dyn Fn(Event) + Send + Sync>>,
}

const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

impl EventMesh {
    pub fn new(history_cap: usize) -> Arc<Self> {
        Arc::new(Self {
            routes: DashMap::new(),
            subscriptions: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(history_cap)),
            history_cap,
            sequence: AtomicU64::new(0),
            alert_sinks: RwLock::new(Vec::new()),
            audit_sink: None,
        })
    }

    pub fn load_route(&self, rule: RouteRule) {
        self.routes.insert(rule.event_pattern.clone(), rule);
    }

    pub fn routes(&self) -> Vec<RouteRule> {
        self.routes.iter().map(|r| r.value().clone()).collect()
    }

    /// Registers a handler for events matching `pattern`. Each subscriber gets its own
    /// bounded mpsc worker so a slow handler never blocks other subscribers (
    /// backpressure).
    pub fn subscribe<F, Fut>(&self, pattern: &str, handler: F) -> String
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::channel::<Event>(SUBSCRIBER_QUEUE_DEPTH);
        let handler = Arc::new(handler);
        let sub_id = id.clone();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handler = handler.clone();
                let event_id = event.event_id.clone();
                let result = tokio::spawn(handler(event)).await;
                if result.is_err() {
                    warn!(target: "grace::mesh", subscription = %sub_id, event_id = %event_id, "handler panicked");
                }
            }
        });

        self.subscriptions.insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                pattern: pattern.to_string(),
                tx,
            },
        );
        id
    }

    pub fn unsubscribe(&self, id: &str) {
        self.subscriptions.remove(id);
    }

    pub async fn register_alert_sink<F, Fut>(&self, sink: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let boxed: Handler = Arc::new(move |e| Box::pin(sink(e)));
        self.alert_sinks.write().await.push(boxed);
    }

    /// Publishes an event: route lookup, history retention, fan-out, synchronous alert
    /// sinks. Audit persistence for `audit=true` events is the caller's responsibility
    /// (the Hub/Gateway/Memory Gateway each append before publishing) — the mesh itself
    /// has no dependency on the audit log, keeping Hub-to-Mesh a one-way dependency with
    /// no back-reference.
    pub async fn publish(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::Relaxed);

        {
            let mut history = self.history.lock().await;
            if history.len() >= self.history_cap {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let matching_subscriptions: Vec<mpsc::Sender<Event>> = self
            .subscriptions
            .iter()
            .filter(|s| pattern_matches(&s.pattern, &event.event_type))
            .map(|s| s.tx.clone())
            .collect();

        for tx in matching_subscriptions {
            let send_event = event.clone();
            match event.priority {
                Priority::Critical | Priority::High => {
                    if tx.send(send_event).await.is_err() {
                        warn!(target: "grace::mesh", event_type = %event.event_type, "subscriber channel closed");
                    }
                }
                Priority::Normal => {
                    if tx.try_send(send_event.clone()).is_err() {
                        // one bounded retry
                        let _ = tokio::time::timeout(
                            std::time::Duration::from_millis(50),
                            tx.send(send_event),
                        )
                        .await;
                    }
                }
                Priority::Low => {
                    if tx.try_send(send_event).is_err() {
                        // dropped; emitting event.dropped is the caller's responsibility
                        // to avoid unbounded recursive publish() calls here.
                    }
                }
            }
        }

        if event.alert {
            let sinks = self.alert_sinks.read().await;
            for sink in sinks.iter() {
                sink(event.clone()).await;
            }
        }
    }

    pub async fn recent(&self, n: usize, event_type_filter: Option<&str>) -> Vec<Event> {
        let history = self.history.lock().await;
        history
            .iter()
            .rev()
            .filter(|e| event_type_filter.map_or(true, |f| pattern_matches(f, &e.event_type)))
            .take(n)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use serde_json::json;

    #[test]
    fn glob_matches_single_segment() {
        assert!(pattern_matches("component.*", "component.activated"));
        assert!(!pattern_matches("component.*", "component.activated.extra"));
        assert!(pattern_matches("unified_logic.*", "unified_logic.rejected"));
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscriber_once_per_publication_no_dedup() {
        let mesh = EventMesh::new(100);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        mesh.subscribe("component.*", move |_e| {
            let counter2 = counter2.clone();
            async move {
                counter2.fetch_add(1, Ordering::SeqCst);
            }
        });

        mesh.publish(Event::new("component.activated", "test", json!({}))).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Publishing the identical event a second time reaches the subscriber again — the
        // mesh performs no dedup between publications, even for an otherwise-identical event.
        mesh.publish(Event::new("component.activated", "test", json!({}))).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn recent_returns_newest_first() {
        let mesh = EventMesh::new(10);
        mesh.publish(Event::new("a.one", "test", json!({}))).await;
        mesh.publish(Event::new("a.two", "test", json!({}))).await;
        let recent = mesh.recent(1, None).await;
        assert_eq!(recent[0].event_type, "a.two");
    }
}
