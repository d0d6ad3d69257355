use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use courier_types::events::GatewayEvent;

const CHANNEL_CAPACITY: usize = 1024;
const REVOCATION_CAPACITY: usize = 256;

/// One published event plus who may see it.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub event: Arc<GatewayEvent>,
    /// `None` means every authenticated client.
    audience: Option<Arc<HashSet<Uuid>>>,
}

impl Broadcast {
    pub fn reaches(&self, user_id: Uuid) -> bool {
        self.audience
            .as_ref()
            .is_none_or(|members| members.contains(&user_id))
    }

    pub fn chat_id(&self) -> Option<Uuid> {
        self.event.chat_id()
    }
}

/// Tells open streams and sockets that their credentials are gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revocation {
    /// One session ended (logout, refresh-token reuse).
    Session(Uuid),
    /// Every session of a user ended (blocked, deleted).
    User(Uuid),
}

impl Revocation {
    pub fn ends(&self, user_id: Uuid, session_id: Uuid) -> bool {
        match *self {
            Self::Session(id) => id == session_id,
            Self::User(id) => id == user_id,
        }
    }
}

/// In-memory fan-out for gateway events. Cloning is cheap; all clones share
/// one channel. Nothing is persisted: a subscriber only sees events
/// published after it subscribed.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    tx: broadcast::Sender<Broadcast>,
    revocations: broadcast::Sender<Revocation>,

    /// user_id -> number of open sockets
    connections: Mutex<HashMap<Uuid, usize>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (revocations, _) = broadcast::channel(REVOCATION_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                tx,
                revocations,
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.tx.subscribe()
    }

    pub fn subscribe_revocations(&self) -> broadcast::Receiver<Revocation> {
        self.inner.revocations.subscribe()
    }

    /// Send an event to every connected client.
    pub fn broadcast(&self, event: GatewayEvent) {
        self.send(Broadcast {
            event: Arc::new(event),
            audience: None,
        });
    }

    /// Send an event only to the given users, normally a chat's members.
    pub fn publish_to_members<I>(&self, members: I, event: GatewayEvent)
    where
        I: IntoIterator<Item = Uuid>,
    {
        self.send(Broadcast {
            event: Arc::new(event),
            audience: Some(Arc::new(members.into_iter().collect())),
        });
    }

    fn send(&self, item: Broadcast) {
        // Err only means nobody is listening right now
        let _ = self.inner.tx.send(item);
    }

    /// Close every stream and socket the revocation covers.
    pub fn revoke(&self, revocation: Revocation) {
        let _ = self.inner.revocations.send(revocation);
    }

    /// Count a new socket for `user_id`. For the user's first socket,
    /// `on_first` runs before the count lock is released, so presence
    /// changes of concurrent connects and disconnects apply in order.
    pub async fn user_online<F, Fut>(&self, user_id: Uuid, on_first: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut connections = self.inner.connections.lock().await;
        let count = connections.entry(user_id).or_insert(0);
        *count += 1;
        let first = *count == 1;
        if first {
            on_first().await;
        }
        first
    }

    /// Drop a socket for `user_id`. `on_last` runs under the count lock when
    /// it was the user's last socket.
    pub async fn user_offline<F, Fut>(&self, user_id: Uuid, on_last: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut connections = self.inner.connections.lock().await;
        let last = match connections.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                connections.remove(&user_id);
                true
            }
            None => false,
        };
        if last {
            on_last().await;
        }
        last
    }
}
