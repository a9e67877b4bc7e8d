//! Oracles consulted around the admission engine.
//!
//! The engine only needs to know whether an API key is valid. IP lists are
//! checked by callers before a request ever reaches the engine: whitelisted
//! sources bypass it, blacklisted sources are rejected outright.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AccessSettings;

/// Answers whether an API key may be used.
pub trait ApiKeyValidator: Send + Sync {
    fn is_valid_api_key(&self, key: &str) -> bool;
}

/// Answers whether a source address is on the allow or deny list.
pub trait IpAccessList: Send + Sync {
    fn is_whitelisted(&self, ip: &str) -> bool;
    fn is_blacklisted(&self, ip: &str) -> bool;
}

/// A registered API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub time_window_seconds: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// No expiry when absent
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl ApiKeyRecord {
    pub fn new(key: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            limit: 0,
            time_window_seconds: 0,
            enabled: true,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Enabled and not yet expired at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.expires_at.map_or(true, |expires| expires >= now)
    }
}

/// In-memory API key registry seeded from configuration.
#[derive(Debug, Default)]
pub struct StaticApiKeys {
    keys: DashMap<String, ApiKeyRecord>,
}

impl StaticApiKeys {
    pub fn new(records: impl IntoIterator<Item = ApiKeyRecord>) -> Self {
        let keys = DashMap::new();
        for record in records {
            keys.insert(record.key.clone(), record);
        }
        Self { keys }
    }

    pub fn insert(&self, record: ApiKeyRecord) {
        self.keys.insert(record.key.clone(), record);
    }

    pub fn get(&self, key: &str) -> Option<ApiKeyRecord> {
        self.keys.get(key).map(|r| r.clone())
    }

    /// Disable a key. Returns `false` if the key is unknown.
    pub fn revoke(&self, key: &str) -> bool {
        match self.keys.get_mut(key) {
            Some(mut record) => {
                record.enabled = false;
                info!(owner = %record.owner, "Revoked API key");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl ApiKeyValidator for StaticApiKeys {
    fn is_valid_api_key(&self, key: &str) -> bool {
        self.keys
            .get(key)
            .map_or(false, |record| record.is_valid(Utc::now()))
    }
}

#[derive(Debug, Default)]
struct IpLists {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

/// Allow/deny lists held in memory. An address is never on both lists.
#[derive(Debug, Default)]
pub struct StaticIpAccessList {
    enabled: bool,
    lists: RwLock<IpLists>,
}

impl StaticIpAccessList {
    pub fn from_settings(settings: &AccessSettings) -> Self {
        let list = Self {
            enabled: settings.enable_ip_filtering,
            lists: RwLock::new(IpLists::default()),
        };
        for ip in &settings.whitelisted_ips {
            list.add_to_whitelist(ip);
        }
        for ip in &settings.blacklisted_ips {
            list.add_to_blacklist(ip);
        }
        info!(
            enabled = list.enabled,
            whitelisted = settings.whitelisted_ips.len(),
            blacklisted = settings.blacklisted_ips.len(),
            "IP access list initialized"
        );
        list
    }

    /// Returns `true` if the address was newly added.
    pub fn add_to_whitelist(&self, ip: &str) -> bool {
        let mut lists = self.lists.write();
        lists.blacklist.remove(ip);
        lists.whitelist.insert(ip.to_string())
    }

    /// Returns `true` if the address was newly added.
    pub fn add_to_blacklist(&self, ip: &str) -> bool {
        let mut lists = self.lists.write();
        lists.whitelist.remove(ip);
        lists.blacklist.insert(ip.to_string())
    }

    pub fn remove_from_whitelist(&self, ip: &str) -> bool {
        self.lists.write().whitelist.remove(ip)
    }

    pub fn remove_from_blacklist(&self, ip: &str) -> bool {
        self.lists.write().blacklist.remove(ip)
    }
}

impl IpAccessList for StaticIpAccessList {
    fn is_whitelisted(&self, ip: &str) -> bool {
        self.enabled && self.lists.read().whitelist.contains(ip)
    }

    fn is_blacklisted(&self, ip: &str) -> bool {
        self.enabled && self.lists.read().blacklist.contains(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_api_key_validity() {
        let now = Utc::now();
        let mut record = ApiKeyRecord::new("k1", "billing");
        assert!(record.is_valid(now));

        record.expires_at = Some(now - Duration::seconds(1));
        assert!(!record.is_valid(now));

        record.expires_at = Some(now + Duration::days(1));
        record.enabled = false;
        assert!(!record.is_valid(now));
    }

    #[test]
    fn test_static_api_keys() {
        let keys = StaticApiKeys::new(vec![ApiKeyRecord::new("k1", "billing")]);
        assert!(keys.is_valid_api_key("k1"));
        assert!(!keys.is_valid_api_key("unknown"));

        assert!(keys.revoke("k1"));
        assert!(!keys.is_valid_api_key("k1"));
        assert!(!keys.revoke("unknown"));
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_ip_lists_are_exclusive() {
        let list = StaticIpAccessList::from_settings(&AccessSettings {
            whitelisted_ips: vec!["10.0.0.1".to_string()],
            blacklisted_ips: vec!["10.0.0.2".to_string()],
            ..Default::default()
        });
        assert!(list.is_whitelisted("10.0.0.1"));
        assert!(list.is_blacklisted("10.0.0.2"));

        assert!(list.add_to_blacklist("10.0.0.1"));
        assert!(!list.is_whitelisted("10.0.0.1"));
        assert!(list.is_blacklisted("10.0.0.1"));

        assert!(list.remove_from_blacklist("10.0.0.1"));
        assert!(!list.is_blacklisted("10.0.0.1"));
        assert!(!list.remove_from_whitelist("10.0.0.9"));
    }

    #[test]
    fn test_ip_filtering_disabled() {
        let list = StaticIpAccessList::from_settings(&AccessSettings {
            enable_ip_filtering: false,
            blacklisted_ips: vec!["10.0.0.2".to_string()],
            ..Default::default()
        });
        assert!(!list.is_blacklisted("10.0.0.2"));
    }
}
