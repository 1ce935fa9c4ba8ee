use std::collections::HashMap;
use std::time::{Duration, Instant};

use ctxrelay_peer::{Connection, ConnectionId, HandshakeRequest};
use serde::Serialize;

/// One registered peer.
#[derive(Debug)]
pub struct Entry {
    pub connection: Connection,
    pub handshake: Option<HandshakeRequest>,
    pub attached_at: Instant,
}

impl Entry {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            handshake: None,
            attached_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Whether this peer is still waiting to announce itself after `timeout`.
    pub fn handshake_overdue(&self, timeout: Duration) -> bool {
        self.handshake.is_none() && self.attached_at.elapsed() >= timeout
    }

    pub fn info(&self) -> ClientInfo {
        let handshake = self.handshake.as_ref();
        ClientInfo {
            id: self.id(),
            peer: self.connection.peer().map(str::to_string),
            transport: self.connection.kind(),
            source: handshake.and_then(|h| h.source.clone()),
            version: handshake.and_then(|h| h.version.clone()),
            handshaken: handshake.is_some(),
            connected_ms: self.attached_at.elapsed().as_millis() as u64,
            dropped: self.connection.dropped_count(),
        }
    }
}

/// Snapshot of a registered peer for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: ConnectionId,
    pub peer: Option<String>,
    pub transport: &'static str,
    pub source: Option<String>,
    pub version: Option<String>,
    pub handshaken: bool,
    pub connected_ms: u64,
    pub dropped: u64,
}

/// Live connections owned by a relay. Unordered.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<ConnectionId, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.id(), entry);
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Entry> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Every entry except `id`.
    pub fn others(&self, id: ConnectionId) -> impl Iterator<Item = &Entry> {
        self.entries.values().filter(move |entry| entry.id() != id)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Entry> + '_ {
        self.entries.drain().map(|(_, entry)| entry)
    }

    /// Snapshots sorted by id.
    pub fn infos(&self) -> Vec<ClientInfo> {
        let mut infos: Vec<ClientInfo> = self.entries.values().map(Entry::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}
