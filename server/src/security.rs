//! Connection-level protection: IP ban list and per-connection rate limits.

use crate::error::ServerError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{Duration, Instant};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Banned addresses with an optional expiry (unix seconds), persisted as a
/// JSON object `{"1.2.3.4": 1700000000, "5.6.7.8": null}`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BanList {
    #[serde(flatten)]
    bans: BTreeMap<IpAddr, Option<u64>>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl BanList {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the list from `path`. A missing file yields an empty list; an
    /// unreadable one is logged and treated as empty.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut list = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring malformed ban list {}: {}", path.display(), e);
                BanList::default()
            }),
            Err(_) => BanList::default(),
        };
        list.path = Some(path.to_path_buf());
        info!("Loaded {} ban(s) from {}", list.bans.len(), path.display());
        list
    }

    pub fn save(&self) -> Result<(), ServerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.bans)
            .map_err(|e| ServerError::Config(format!("ban list encoding: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Bans `ip`, permanently when `duration` is `None`.
    pub fn ban(&mut self, ip: IpAddr, duration: Option<Duration>) -> Result<(), ServerError> {
        let until = duration.map(|d| unix_now() + d.as_secs().max(1));
        self.bans.insert(ip, until);
        warn!("Banned {} until {:?}", ip, until);
        self.save()
    }

    pub fn unban(&mut self, ip: IpAddr) -> Result<bool, ServerError> {
        let removed = self.bans.remove(&ip).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.is_banned_at(ip, unix_now())
    }

    pub fn is_banned_at(&self, ip: IpAddr, now_unix: u64) -> bool {
        match self.bans.get(&ip) {
            Some(None) => true,
            Some(Some(until)) => *until > now_unix,
            None => false,
        }
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = unix_now();
        let before = self.bans.len();
        self.bans
            .retain(|_, until| until.map_or(true, |until| until > now));
        before - self.bans.len()
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}

/// Sliding-window limiter: at most `limit` events in any `window`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    events: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            events: VecDeque::new(),
        }
    }

    pub fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    /// Records an event at `now` if the budget allows it.
    pub fn allow(&mut self, now: Instant) -> bool {
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) >= self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        if self.events.len() >= self.limit {
            return false;
        }
        self.events.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(raw: &str) -> IpAddr {
        raw.parse().unwrap()
    }

    #[test]
    fn test_permanent_and_expiring_bans() {
        let mut list = BanList::in_memory();
        list.ban(ip("1.2.3.4"), None).unwrap();
        list.ban(ip("5.6.7.8"), Some(Duration::from_secs(10))).unwrap();

        let now = unix_now();
        assert!(list.is_banned_at(ip("1.2.3.4"), now + 1_000_000));
        assert!(list.is_banned_at(ip("5.6.7.8"), now));
        assert!(!list.is_banned_at(ip("5.6.7.8"), now + 11));
        assert!(!list.is_banned(ip("9.9.9.9")));
    }

    #[test]
    fn test_unban() {
        let mut list = BanList::in_memory();
        list.ban(ip("::1"), None).unwrap();
        assert!(list.unban(ip("::1")).unwrap());
        assert!(!list.unban(ip("::1")).unwrap());
        assert!(list.is_empty());
    }

    #[test]
    fn test_ban_list_persists() {
        let path = std::env::temp_dir().join(format!(
            "netplay-banlist-{}-{}.json",
            std::process::id(),
            unix_now()
        ));
        {
            let mut list = BanList::load(&path);
            assert!(list.is_empty());
            list.ban(ip("10.0.0.1"), None).unwrap();
        }
        let reloaded = BanList::load(&path);
        assert!(reloaded.is_banned(ip("10.0.0.1")));
        assert_eq!(reloaded.len(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_ban_list_is_empty() {
        let path = std::env::temp_dir().join(format!("netplay-bad-{}.json", std::process::id()));
        std::fs::write(&path, "not json").unwrap();
        let list = BanList::load(&path);
        assert!(list.is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_rate_limiter_window() {
        let start = Instant::now();
        let mut limiter = RateLimiter::per_second(2);
        assert!(limiter.allow(start));
        assert!(limiter.allow(start + Duration::from_millis(100)));
        assert!(!limiter.allow(start + Duration::from_millis(200)));
        assert!(limiter.allow(start + Duration::from_millis(1000)));
    }
}
