//! # Cluster Event Bus
//!
//! Bridges local events and cluster messages in both directions.
//!
//! ## Outbound
//!
//! [`EventBus::call_event`] runs every listener registered for the event
//! type, in registration order, handing each a `&mut` [`Dispatched`]. Once
//! dispatch is over the (possibly edited) event is asked for its cluster
//! form and, unless a listener cancelled it, that message is published.
//!
//! ## Inbound
//!
//! [`EventBus::receive`] wraps a raw payload in a [`MessageEvent`], lets
//! local listeners see (and veto) it, then decodes it with the strict
//! [`ClusterCommand::decode`]. Malformed payloads are logged at debug and
//! dropped; nothing is reported back to the publisher.

use crate::error::{ClusterError, EventError};
use crate::store::{KeySpace, StoreClient};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub mod events;
pub mod message;

pub use events::{ClusterEvent, Dispatched, MessageEvent, PlayerTransferEvent, WorldLoadRequestEvent};
pub use message::{ClusterCommand, ClusterMessage, FIELD_DELIMITER, SHUTDOWN_DIRECTIVE};

type Listener<E> = dyn Fn(&mut Dispatched<E>) -> Result<(), EventError> + Send + Sync;

struct RegisteredListener {
    name: String,
    /// Holds an `Arc<Listener<E>>` for the event type it is filed under
    callback: Box<dyn Any + Send + Sync>,
}

/// Counters exposed for monitoring.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct EventBusStats {
    pub total_listeners: usize,
    pub events_raised: u64,
    pub events_cancelled: u64,
    pub messages_published: u64,
    pub messages_received: u64,
    pub malformed_messages: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_raised: AtomicU64,
    events_cancelled: AtomicU64,
    messages_published: AtomicU64,
    messages_received: AtomicU64,
    malformed_messages: AtomicU64,
}

/// Local listener registry plus the cluster publish path.
pub struct EventBus {
    keys: KeySpace,
    store: StoreClient,
    listeners: DashMap<TypeId, Vec<RegisteredListener>>,
    sequence: AtomicU64,
    counters: Counters,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("keys", &self.keys)
            .field("listeners", &"[listeners]")
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl EventBus {
    pub fn new(keys: KeySpace, store: StoreClient) -> Self {
        Self {
            keys,
            store,
            listeners: DashMap::new(),
            sequence: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Registers a listener for events of type `E`.
    ///
    /// # Arguments
    ///
    /// * `name` - Used in logs when the listener fails
    /// * `listener` - Receives the in-flight event; may edit or cancel it
    pub fn on<E, F>(&self, name: &str, listener: F)
    where
        E: ClusterEvent,
        F: Fn(&mut Dispatched<E>) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let callback: Arc<Listener<E>> = Arc::new(listener);
        self.listeners
            .entry(TypeId::of::<E>())
            .or_default()
            .push(RegisteredListener {
                name: name.to_string(),
                callback: Box::new(callback),
            });
        debug!("Registered listener '{}' for {}", name, std::any::type_name::<E>());
    }

    pub fn listener_count<E: ClusterEvent>(&self) -> usize {
        self.listeners
            .get(&TypeId::of::<E>())
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Raises `event` locally, then publishes its cluster form unless cancelled.
    ///
    /// Listener failures are logged and do not stop dispatch. A failed
    /// publish is logged at warn; the dispatched event is returned either way.
    pub async fn call_event<E: ClusterEvent>(&self, event: E) -> Dispatched<E> {
        let dispatched = self.dispatch_local(event);

        if dispatched.is_cancelled() {
            self.counters.events_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!("Event '{}' cancelled by a listener", dispatched.event.event_name());
            return dispatched;
        }

        if let Some(message) = dispatched.event.to_cluster_message(&self.keys) {
            if let Err(e) = self.publish(message).await {
                warn!(
                    "⚠️ Could not publish '{}' to the cluster: {}",
                    dispatched.event.event_name(),
                    e
                );
            }
        }
        dispatched
    }

    /// Publishes a message as-is. Returns the number of receivers.
    pub async fn publish(&self, message: ClusterMessage) -> Result<usize, ClusterError> {
        let message = message.with_sequence(self.next_sequence());
        let receivers = self.store.publish(&message.channel, &message.payload()).await?;
        self.counters.messages_published.fetch_add(1, Ordering::Relaxed);
        debug!("📤 Published {} to {} receiver(s)", message, receivers);
        Ok(receivers)
    }

    /// Runs an inbound payload through local listeners and decodes it.
    ///
    /// # Returns
    ///
    /// The decoded command, or `None` when a listener cancelled the message
    /// or it failed validation.
    pub fn receive(&self, channel: &str, payload: &str) -> Option<ClusterCommand> {
        let sequence_no = self.next_sequence();
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);

        let dispatched = self.dispatch_local(MessageEvent {
            channel: channel.to_string(),
            message: payload.to_string(),
            sequence_no,
        });
        if dispatched.is_cancelled() {
            self.counters.events_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!("Inbound message #{} on '{}' cancelled locally", sequence_no, channel);
            return None;
        }

        let event = dispatched.into_inner();
        let message = ClusterMessage::from_payload(event.channel, sequence_no, &event.message);
        match ClusterCommand::decode(&self.keys, &message) {
            Ok(command) => {
                debug!("📥 Received {}", message);
                Some(command)
            }
            Err(e) => {
                self.counters.malformed_messages.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping inbound payload: {}", e);
                None
            }
        }
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_listeners: self.listeners.iter().map(|entry| entry.value().len()).sum(),
            events_raised: self.counters.events_raised.load(Ordering::Relaxed),
            events_cancelled: self.counters.events_cancelled.load(Ordering::Relaxed),
            messages_published: self.counters.messages_published.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            malformed_messages: self.counters.malformed_messages.load(Ordering::Relaxed),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn dispatch_local<E: ClusterEvent>(&self, event: E) -> Dispatched<E> {
        self.counters.events_raised.fetch_add(1, Ordering::Relaxed);

        // Snapshot the listeners so one may register another without deadlocking
        let listeners: Vec<(String, Arc<Listener<E>>)> = self
            .listeners
            .get(&TypeId::of::<E>())
            .map(|registered| {
                registered
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .callback
                            .downcast_ref::<Arc<Listener<E>>>()
                            .map(|callback| (entry.name.clone(), callback.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut dispatched = Dispatched::new(event);
        for (name, listener) in listeners {
            if let Err(e) = listener(&mut dispatched) {
                error!(
                    "❌ Listener '{}' failed on '{}': {}",
                    name,
                    dispatched.event.event_name(),
                    e
                );
            }
        }
        dispatched
    }
}
