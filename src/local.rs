//! In-process chatroom backend.
//!
//! `LocalHub` implements [`Connector`], [`Connection`] and [`Directory`]
//! without a network.  Members joined to the hub's room receive each other's
//! messages in one global sequence.  The hub also carries fault injection
//! for exercising the session: it can go offline, reject joins, fail sends,
//! drop every connection, and slow down name lookups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::{
    Connection, ConnectionEvent, Connector, Directory, EventStream, IncomingMessage, MessageId,
    RoomRef,
};
use crate::error::{Error, Result};

/// Conversation id of the hub's room.
const LOCAL_ROOM_ID: &str = "local-room";

/// One message as the hub delivered it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Client that sent the message.
    pub sender_id: String,
    /// Message body.
    pub text: String,
    /// Hub delivery order.
    pub sequence: u64,
}

/// A joined connection.
struct Member {
    /// Client identifier the connection was opened for.
    client_id: String,
    /// Push side of the connection's event stream.
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

struct HubState {
    room: RoomRef,
    users: HashMap<String, String>,
    /// Joined connections (`connection id` -> member).
    members: HashMap<u64, Member>,
    next_connection_id: u64,
    sequence: u64,
    online: bool,
    join_rejection: Option<String>,
    fail_sends: bool,
    lookup_delay: Duration,
    lookups: HashMap<String, usize>,
    transcript: Vec<TranscriptEntry>,
}

impl HubState {
    /// Delivers `text` to every member except connections of `sender_id`.
    fn fan_out(&mut self, sender_id: &str, text: &str) -> u64 {
        self.sequence += 1;
        let message = IncomingMessage {
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            sequence: self.sequence,
        };
        for member in self.members.values() {
            if member.client_id != sender_id {
                let _ = member
                    .events
                    .send(ConnectionEvent::Message(message.clone()));
            }
        }
        self.transcript.push(TranscriptEntry {
            sender_id: message.sender_id,
            text: message.text,
            sequence: message.sequence,
        });
        self.sequence
    }
}

/// A single in-process chatroom.  Clones share the same room.
#[derive(Clone)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    /// Creates an online hub hosting one room named `room_name`.
    pub fn new(room_name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                room: RoomRef::new(LOCAL_ROOM_ID, room_name),
                users: HashMap::new(),
                members: HashMap::new(),
                next_connection_id: 1,
                sequence: 0,
                online: true,
                join_rejection: None,
                fail_sends: false,
                lookup_delay: Duration::ZERO,
                lookups: HashMap::new(),
                transcript: Vec::new(),
            })),
        }
    }

    /// The room hosted by this hub.
    pub fn room(&self) -> RoomRef {
        self.lock().room.clone()
    }

    /// Registers the display name the directory returns for `client_id`.
    pub fn register_user(&self, client_id: impl Into<String>, username: impl Into<String>) {
        self.lock().users.insert(client_id.into(), username.into());
    }

    /// Returns a connector that opens connections for `client_id`.
    pub fn connector(&self, client_id: impl Into<String>) -> LocalConnector {
        LocalConnector {
            hub: self.clone(),
            client_id: client_id.into(),
        }
    }

    /// Delivers a message from `sender_id` as if a remote member sent it.
    ///
    /// Returns the message's sequence number.
    pub fn publish(&self, sender_id: &str, text: &str) -> u64 {
        self.lock().fan_out(sender_id, text)
    }

    /// Disconnects every member with `reason`.
    pub fn drop_connections(&self, reason: &str) {
        let members: Vec<Member> = self.lock().members.drain().map(|(_, m)| m).collect();
        tracing::debug!(count = members.len(), reason, "dropping local connections");
        for member in members {
            let _ = member.events.send(ConnectionEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// While offline, opening and joining fail.
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// Rejects every join with `reason` until cleared with `None`.
    pub fn reject_joins(&self, reason: Option<String>) {
        self.lock().join_rejection = reason;
    }

    /// Makes every send fail while set.
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Delays every directory lookup by `delay`.
    pub fn set_lookup_delay(&self, delay: Duration) {
        self.lock().lookup_delay = delay;
    }

    /// Number of directory lookups made for `client_id`.
    pub fn lookup_count(&self, client_id: &str) -> usize {
        self.lock().lookups.get(client_id).copied().unwrap_or(0)
    }

    /// Every message delivered so far, in order.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.lock().transcript.clone()
    }

    /// Number of joined connections.
    pub fn member_count(&self) -> usize {
        self.lock().members.len()
    }

    /// Joins a peer that answers every message it receives.
    ///
    /// The peer replies with `"<username> heard: <text>"` until the hub drops
    /// its connection.
    pub async fn spawn_echo_peer(
        &self,
        client_id: &str,
        username: &str,
    ) -> Result<JoinHandle<()>> {
        self.register_user(client_id, username);
        let mut connection = self.connector(client_id).open().await?;
        connection.join(&self.room()).await?;
        let mut events = connection.subscribe()?;
        let username = username.to_string();
        Ok(tokio::spawn(async move {
            while let Some(ConnectionEvent::Message(message)) = events.recv().await {
                let reply = format!("{username} heard: {}", message.text);
                if let Err(err) = connection.send(&reply).await {
                    tracing::debug!(error = %err, "echo peer stopped");
                    break;
                }
            }
            connection.close().await;
        }))
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Directory for LocalHub {
    async fn username(&self, sender_id: &str) -> Result<String> {
        let delay = {
            let mut state = self.lock();
            *state.lookups.entry(sender_id.to_string()).or_insert(0) += 1;
            state.lookup_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.lock().users.get(sender_id).cloned().ok_or_else(|| {
            Error::not_found(
                "Could not find user.",
                Some("user".to_string()),
                Some(sender_id.to_string()),
            )
        })
    }
}

/// Opens connections to a [`LocalHub`] for one client.
#[derive(Clone)]
pub struct LocalConnector {
    hub: LocalHub,
    client_id: String,
}

#[async_trait::async_trait]
impl Connector for LocalConnector {
    async fn open(&self) -> Result<Box<dyn Connection>> {
        if !self.hub.lock().online {
            return Err(Error::connection("chat server is offline", None));
        }
        Ok(Box::new(LocalConnection {
            hub: self.hub.clone(),
            client_id: self.client_id.clone(),
            connection_id: None,
            events: None,
        }))
    }
}

/// A connection to a [`LocalHub`].
pub struct LocalConnection {
    hub: LocalHub,
    client_id: String,
    connection_id: Option<u64>,
    events: Option<EventStream>,
}

impl LocalConnection {
    fn joined_id(&self) -> Result<u64> {
        self.connection_id
            .ok_or_else(|| Error::validation("connection has not joined a room", None))
    }
}

#[async_trait::async_trait]
impl Connection for LocalConnection {
    async fn join(&mut self, room: &RoomRef) -> Result<u64> {
        let mut state = self.hub.lock();
        if !state.online {
            return Err(Error::connection("chat server is offline", None));
        }
        if room.id != state.room.id {
            return Err(Error::join("no such chatroom", Some(room.name.clone())));
        }
        if let Some(reason) = &state.join_rejection {
            return Err(Error::join(reason.clone(), Some(room.name.clone())));
        }
        if let Some(id) = self.connection_id.take() {
            state.members.remove(&id);
        }

        let id = state.next_connection_id;
        state.next_connection_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.members.insert(
            id,
            Member {
                client_id: self.client_id.clone(),
                events: tx,
            },
        );
        self.connection_id = Some(id);
        self.events = Some(rx);
        tracing::debug!(client_id = %self.client_id, connection_id = id, "joined local room");
        Ok(state.members.len() as u64)
    }

    async fn send(&mut self, text: &str) -> Result<MessageId> {
        let id = self.joined_id()?;
        let mut state = self.hub.lock();
        if !state.members.contains_key(&id) {
            return Err(Error::send("connection closed", None));
        }
        if state.fail_sends {
            return Err(Error::send("the chat server rejected the message", None));
        }
        let sequence = state.fan_out(&self.client_id, text);
        Ok(MessageId(format!("local-{sequence}")))
    }

    async fn members_count(&self) -> Result<u64> {
        self.joined_id()?;
        Ok(self.hub.lock().members.len() as u64)
    }

    fn subscribe(&mut self) -> Result<EventStream> {
        self.events
            .take()
            .ok_or_else(|| Error::validation("event stream already taken or not joined", None))
    }

    async fn close(&mut self) {
        if let Some(id) = self.connection_id.take() {
            self.hub.lock().members.remove(&id);
        }
    }
}
