//! Channel registry
//!
//! At most one live channel per resource. Registering a channel for a
//! resource that already has one closes the old channel first.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::channel::{ChannelHandle, ChannelId};

/// Kind of resource a channel streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Conversation,
    Document,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Conversation => f.write_str("conversation"),
            ResourceKind::Document => f.write_str("document"),
        }
    }
}

/// Registry key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceId {
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Conversation,
            id: id.into(),
        }
    }

    pub fn document(id: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Document,
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Live channels keyed by resource
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<ResourceId, ChannelHandle>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel, closing the one it replaces
    ///
    /// Returns the id of the replaced channel, if any.
    pub fn register(&mut self, handle: ChannelHandle) -> Option<ChannelId> {
        let resource = handle.resource().clone();
        let previous = self.channels.insert(resource.clone(), handle)?;
        previous.close();
        debug!(resource = %resource, replaced = %previous.id(), "Replaced channel");
        Some(previous.id())
    }

    /// Live channel for a resource
    pub fn get(&self, resource: &ResourceId) -> Option<&ChannelHandle> {
        self.channels.get(resource).filter(|handle| handle.is_live())
    }

    /// Whether the resource has a live channel
    pub fn is_live(&self, resource: &ResourceId) -> bool {
        self.get(resource).is_some()
    }

    /// Whether any channel is registered for the resource, live or not
    pub fn contains(&self, resource: &ResourceId) -> bool {
        self.channels.contains_key(resource)
    }

    /// Whether `id` is the channel registered for the resource, live or not
    pub fn holds(&self, resource: &ResourceId, id: ChannelId) -> bool {
        self.channels
            .get(resource)
            .is_some_and(|handle| handle.id() == id)
    }

    /// Remove and close the channel for a resource
    pub fn unregister(&mut self, resource: &ResourceId) -> Option<ChannelHandle> {
        let handle = self.channels.remove(resource)?;
        handle.close();
        Some(handle)
    }

    /// Remove and close the channel for a resource only if it is `id`
    ///
    /// A channel that was already replaced leaves its successor alone.
    pub fn unregister_channel(&mut self, resource: &ResourceId, id: ChannelId) -> bool {
        match self.channels.get(resource) {
            Some(handle) if handle.id() == id => {
                self.unregister(resource);
                true
            }
            _ => false,
        }
    }

    /// Close and remove every channel
    ///
    /// Returns the number of channels removed.
    pub fn close_all(&mut self) -> usize {
        let count = self.channels.len();
        for (_, handle) in self.channels.drain() {
            handle.close();
        }
        if count > 0 {
            debug!(count, "Closed all channels");
        }
        count
    }

    /// Number of registered channels, live or not
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
