use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// Manages all connected clients and routes events to them.
///
/// Room-scoped traffic (group messages, channel posts, role changes) is sent
/// to the member list the caller passes in, never to whoever happens to be
/// listening. The broadcast channel is reserved for events every user may
/// see, such as presence and stories.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for global events
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Track online users: user_id -> username
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Per-user targeted send channels: user_id -> (conn_id -> sender).
    /// A user may be connected from several devices at once.
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to global gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a targeted channel for one connection. Returns (conn_id, receiver).
    pub async fn register_connection(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Drop one connection. Returns true if it was the user's last one.
    pub async fn unregister_connection(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut channels = self.inner.user_channels.write().await;
        let Some(conns) = channels.get_mut(&user_id) else {
            return false;
        };
        conns.remove(&conn_id);
        if conns.is_empty() {
            channels.remove(&user_id);
            true
        } else {
            false
        }
    }

    /// Send a targeted event to every connection of a user.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some(conns) = channels.get(&user_id) {
            for tx in conns.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Fan an event out to a set of users, typically a member list.
    pub async fn send_to_users<I>(&self, user_ids: I, event: GatewayEvent)
    where
        I: IntoIterator<Item = Uuid>,
    {
        let channels = self.inner.user_channels.read().await;
        for user_id in user_ids {
            if let Some(conns) = channels.get(&user_id) {
                for tx in conns.values() {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }

    /// Register a user as online. Only the first connection announces presence.
    pub async fn user_online(&self, user_id: Uuid, username: String) {
        let was_online = self
            .inner
            .online_users
            .write()
            .await
            .insert(user_id, username.clone())
            .is_some();

        if !was_online {
            self.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                username,
                online: true,
            });
        }
    }

    /// Drop a connection and, if it was the user's last, mark them offline.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        if !self.unregister_connection(user_id, conn_id).await {
            // Another device is still connected
            return;
        }

        let username = self
            .inner
            .online_users
            .write()
            .await
            .remove(&user_id)
            .unwrap_or_default();

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username,
            online: false,
        });
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.online_users.read().await.contains_key(&user_id)
    }
}
