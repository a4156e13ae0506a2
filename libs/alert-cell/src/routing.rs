use std::collections::HashMap;

use shared_models::Channel;

use crate::models::{AlertKind, AlertPriority};

/// Static mapping from alert kind and priority to delivery channels.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    by_priority: HashMap<AlertPriority, Vec<Channel>>,
    by_kind: HashMap<(AlertKind, AlertPriority), Vec<Channel>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        let by_priority = HashMap::from([
            (AlertPriority::Critical, vec![Channel::Voice, Channel::Messaging, Channel::Email]),
            (AlertPriority::High, vec![Channel::Messaging, Channel::Email]),
            (AlertPriority::Medium, vec![Channel::Email]),
            (AlertPriority::Low, vec![Channel::Email]),
        ]);

        Self {
            by_priority,
            by_kind: HashMap::new(),
        }
    }
}

impl RoutingTable {
    /// A table with no routes at all.
    pub fn empty() -> Self {
        Self {
            by_priority: HashMap::new(),
            by_kind: HashMap::new(),
        }
    }

    pub fn with_route(mut self, priority: AlertPriority, channels: Vec<Channel>) -> Self {
        self.by_priority.insert(priority, dedup(channels));
        self
    }

    /// Route for one kind at one priority, taking precedence over the priority route.
    pub fn with_kind_route(mut self, kind: AlertKind, priority: AlertPriority, channels: Vec<Channel>) -> Self {
        self.by_kind.insert((kind, priority), dedup(channels));
        self
    }

    /// Add a channel to every priority at or above `min_priority`.
    pub fn with_channel_from(mut self, channel: Channel, min_priority: AlertPriority) -> Self {
        for (priority, channels) in self.by_priority.iter_mut() {
            if *priority >= min_priority && !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        self
    }

    pub fn channels_for(&self, kind: AlertKind, priority: AlertPriority) -> Vec<Channel> {
        self.by_kind
            .get(&(kind, priority))
            .or_else(|| self.by_priority.get(&priority))
            .cloned()
            .unwrap_or_default()
    }
}

fn dedup(channels: Vec<Channel>) -> Vec<Channel> {
    let mut unique = Vec::with_capacity(channels.len());
    for channel in channels {
        if !unique.contains(&channel) {
            unique.push(channel);
        }
    }
    unique
}
