//! Cross-instance invalidation over the backing store's pub/sub channel.
//!
//! ## How It Works
//!
//! ```text
//! Instance A: set("k", v)  -> L2 SET, L1 SET
//!   ↓ (spawned, not awaited)
//! PUBLISH sync {"originId":"A","action":1,"key":"k","value":v,"ttl":100}
//!   ↓
//! Instance A: listener sees originId == self -> skipped
//! Instance B: listener -> L1 SET "k"
//! ```
//!
//! Delivery is best effort. A lost message leaves a stale L1 entry on the
//! receiving side for at most one TTL window.

use crate::backend::BackingStore;
use crate::error::{Error, Result};
use crate::local::LocalCache;
use crate::serialization::{decode, encode, SharedSerializer};
use futures::StreamExt;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Length of the random per-instance identity.
const INSTANCE_ID_LEN: usize = 16;

/// Generate the random identity used to recognise our own broadcasts.
pub(crate) fn generate_instance_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(INSTANCE_ID_LEN)
        .map(char::from)
        .collect()
}

/// What happened to a key; encoded as `1` (Set) or `2` (Delete) on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SyncAction {
    Set,
    Delete,
}

impl From<SyncAction> for u8 {
    fn from(action: SyncAction) -> u8 {
        match action {
            SyncAction::Set => 1,
            SyncAction::Delete => 2,
        }
    }
}

impl TryFrom<u8> for SyncAction {
    type Error = String;

    fn try_from(raw: u8) -> std::result::Result<Self, Self::Error> {
        match raw {
            1 => Ok(SyncAction::Set),
            2 => Ok(SyncAction::Delete),
            other => Err(format!("unknown sync action {}", other)),
        }
    }
}

/// One invalidation event as broadcast on the sync channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub origin_id: String,
    pub action: SyncAction,
    pub key: String,
    /// Serialized value for `Set`, empty for `Delete`.
    pub value: String,
    /// Lifetime in seconds for `Set`, 0 for `Delete`.
    pub ttl: i64,
}

impl SyncMessage {
    pub fn set(origin_id: &str, key: &str, value: String, ttl: Duration) -> Self {
        SyncMessage {
            origin_id: origin_id.to_string(),
            action: SyncAction::Set,
            key: key.to_string(),
            value,
            ttl: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub fn delete(origin_id: &str, key: &str) -> Self {
        SyncMessage {
            origin_id: origin_id.to_string(),
            action: SyncAction::Delete,
            key: key.to_string(),
            value: String::new(),
            ttl: 0,
        }
    }
}

/// Fire-and-forget sender for this instance's Set/Delete events.
pub(crate) struct SyncPublisher<B: BackingStore> {
    store: Arc<B>,
    codec: SharedSerializer,
    instance_id: Arc<str>,
    channel: Arc<str>,
}

impl<B: BackingStore> SyncPublisher<B> {
    pub(crate) fn new(
        store: Arc<B>,
        codec: SharedSerializer,
        instance_id: Arc<str>,
        channel: Arc<str>,
    ) -> Self {
        SyncPublisher {
            store,
            codec,
            instance_id,
            channel,
        }
    }

    pub(crate) fn publish_set(&self, key: &str, value: String, ttl: Duration) {
        self.spawn(SyncMessage::set(&self.instance_id, key, value, ttl));
    }

    pub(crate) fn publish_delete(&self, key: &str) {
        self.spawn(SyncMessage::delete(&self.instance_id, key));
    }

    // Never awaited by the writer; failures only cost other instances freshness.
    fn spawn(&self, message: SyncMessage) {
        let store = Arc::clone(&self.store);
        let codec = self.codec.current();
        let channel = Arc::clone(&self.channel);

        tokio::spawn(async move {
            let payload = match encode(codec.as_ref(), &message) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping sync broadcast for {}: {}", message.key, e);
                    return;
                }
            };

            match store.publish(&channel, &payload).await {
                Ok(()) => debug!(
                    "✓ Sync {:?} published for key {}",
                    message.action, message.key
                ),
                Err(e) => warn!(
                    "Sync {:?} publish failed for key {}: {}",
                    message.action, message.key, e
                ),
            }
        });
    }
}

/// Outcome of handling one received payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    Applied(SyncAction),
    OwnMessage,
    Malformed,
}

/// Long-lived receive loop applying remote events to the local tier.
pub(crate) struct SyncListener<B: BackingStore> {
    store: Arc<B>,
    local: Arc<LocalCache>,
    codec: SharedSerializer,
    instance_id: Arc<str>,
    channel: Arc<str>,
    reconnect_backoff: Duration,
}

impl<B: BackingStore> SyncListener<B> {
    pub(crate) fn new(
        store: Arc<B>,
        local: Arc<LocalCache>,
        codec: SharedSerializer,
        instance_id: Arc<str>,
        channel: Arc<str>,
        reconnect_backoff: Duration,
    ) -> Self {
        SyncListener {
            store,
            local,
            codec,
            instance_id,
            channel,
            reconnect_backoff,
        }
    }

    /// Receive until `shutdown` flips to true or its sender goes away.
    ///
    /// A lost subscription is reopened on the same channel after a fixed
    /// backoff, indefinitely.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Sync listener {} starting on channel {}",
            self.instance_id, self.channel
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                outcome = self.listen() => {
                    if let Err(e) = outcome {
                        error!(
                            "Sync listener lost channel {}: {}, reconnecting in {:?}",
                            self.channel, e, self.reconnect_backoff
                        );
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.reconnect_backoff) => {}
            }
        }

        info!("Sync listener {} stopped", self.instance_id);
    }

    /// One subscription lifetime. Always ends in `Err`: the stream only
    /// finishes when the connection does.
    async fn listen(&self) -> Result<()> {
        let mut messages = self.store.subscribe(&self.channel).await?;

        while let Some(item) = messages.next().await {
            match item {
                Ok(payload) => {
                    self.handle(&payload).await;
                }
                Err(e) => warn!("Skipping unreadable sync message: {}", e),
            }
        }

        Err(Error::ConnectionError("sync subscription closed".to_string()))
    }

    pub(crate) async fn handle(&self, payload: &str) -> Disposition {
        let codec = self.codec.current();
        let message: SyncMessage = match decode(codec.as_ref(), payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping malformed sync message: {}", e);
                return Disposition::Malformed;
            }
        };

        // Our own writes were applied synchronously before publishing
        if message.origin_id.as_str() == &*self.instance_id {
            return Disposition::OwnMessage;
        }

        debug!(
            "Sync {:?} for key {} from {}",
            message.action, message.key, message.origin_id
        );

        match message.action {
            SyncAction::Set => {
                let ttl = Duration::from_secs(u64::try_from(message.ttl).unwrap_or(0));
                self.local.set(message.key, message.value, ttl).await;
            }
            SyncAction::Delete => {
                self.local.delete(&message.key).await;
            }
        }
        Disposition::Applied(message.action)
    }
}
