use std::collections::HashMap;

pub type SessionId = u64;

/// Display names of live sessions plus the live-connection count. Names are
/// the raw bytes the client sent and need not be UTF-8.
///
/// Not synchronised on its own; the server keeps it behind a single lock so
/// that renames, departures and the counter move together.
#[derive(Default)]
pub struct Registry {
    names: HashMap<SessionId, Vec<u8>>,
    live: usize,
    next_id: SessionId,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a newly accepted connection and hands out its identity.
    pub fn admit(&mut self) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        self.live += 1;
        id
    }

    /// Sets the display name for a session and returns the one it replaced.
    pub fn rename(&mut self, id: SessionId, name: Vec<u8>) -> Option<Vec<u8>> {
        self.names.insert(id, name)
    }

    pub fn name_of(&self, id: SessionId) -> Option<&[u8]> {
        self.names.get(&id).map(Vec::as_slice)
    }

    /// Forgets a session and uncounts it. Returns the name it last had.
    pub fn depart(&mut self, id: SessionId) -> Option<Vec<u8>> {
        self.live = self.live.saturating_sub(1);
        self.names.remove(&id)
    }

    pub fn live(&self) -> usize {
        self.live
    }
}
