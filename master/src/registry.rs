//! The master server's table of advertised session servers.
//!
//! Entries are created by REGISTER, refreshed by HEARTBEAT and removed by
//! UNREGISTER or by the periodic reap once their last heartbeat is older
//! than the staleness window. Listing never reaps; it only reads, so it is
//! cheap and always sees whole entries.

use crate::error::MasterError;
use log::{debug, info};
use shared::{ListFilter, ServerListing, ServerMetadata};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: String,
    pub address: String,
    pub metadata: ServerMetadata,
    /// Registration order, used to keep listings stable.
    pub order: u64,
    pub last_heartbeat: Instant,
}

impl RegistryEntry {
    pub fn listing(&self) -> ServerListing {
        ServerListing {
            address: self.address.clone(),
            player_count: self.metadata.player_count,
            capacity: self.metadata.capacity,
            metadata: self.metadata.clone(),
        }
    }

    pub fn is_fresh(&self, now: Instant, stale_after: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) <= stale_after
    }
}

#[derive(Debug)]
pub struct MasterRegistry {
    entries: HashMap<String, RegistryEntry>,
    next_order: u64,
    stale_after: Duration,
    max_entries: usize,
}

fn mint_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

impl MasterRegistry {
    pub fn new(stale_after: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next_order: 0,
            stale_after,
            max_entries,
        }
    }

    /// Adds an entry and returns its fresh registry id. A server registering
    /// again from the same address replaces its previous entry.
    pub fn register(
        &mut self,
        address: String,
        metadata: ServerMetadata,
        now: Instant,
    ) -> Result<String, MasterError> {
        let previous: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.address == address && entry.metadata.name == metadata.name)
            .map(|entry| entry.id.clone())
            .collect();
        for id in previous {
            debug!("Replacing registry entry {} for {}", id, address);
            self.entries.remove(&id);
        }

        if self.entries.len() >= self.max_entries {
            return Err(MasterError::RegistryFull(self.max_entries));
        }

        let id = mint_id();
        info!(
            "Registered {} ({}) as {}",
            address, metadata.name, id
        );
        self.entries.insert(
            id.clone(),
            RegistryEntry {
                id: id.clone(),
                address,
                metadata,
                order: self.next_order,
                last_heartbeat: now,
            },
        );
        self.next_order += 1;
        Ok(id)
    }

    pub fn heartbeat(
        &mut self,
        id: &str,
        metadata: ServerMetadata,
        now: Instant,
    ) -> Result<(), MasterError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| MasterError::UnknownRegistryId(id.to_string()))?;
        entry.metadata = metadata;
        entry.last_heartbeat = now;
        Ok(())
    }

    /// Removes an entry; unknown ids are ignored.
    pub fn unregister(&mut self, id: &str) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            info!("Unregistered {}", id);
        }
        removed
    }

    /// Drops every entry whose last heartbeat is older than the staleness
    /// window and returns how many were removed.
    pub fn reap(&mut self, now: Instant) -> usize {
        let stale_after = self.stale_after;
        let before = self.entries.len();
        self.entries.retain(|id, entry| {
            let fresh = entry.is_fresh(now, stale_after);
            if !fresh {
                info!("Reaping stale entry {} ({})", id, entry.address);
            }
            fresh
        });
        before - self.entries.len()
    }

    /// Fresh entries matching `filter`, in registration order. Entries past
    /// the staleness window are hidden even before the next sweep.
    pub fn list(&self, filter: &ListFilter, now: Instant) -> Vec<ServerListing> {
        let mut entries: Vec<&RegistryEntry> = self
            .entries
            .values()
            .filter(|entry| entry.is_fresh(now, self.stale_after))
            .filter(|entry| filter.matches(&entry.metadata))
            .collect();
        entries.sort_by_key(|entry| entry.order);
        let limit = filter.limit.filter(|&n| n > 0).unwrap_or(usize::MAX);
        entries
            .into_iter()
            .take(limit)
            .map(RegistryEntry::listing)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
