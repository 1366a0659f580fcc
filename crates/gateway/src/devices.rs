//! Session & Device Registry: the pending -> approved -> revoked lifecycle
//! for clients that connect directly via `hello{deviceId, ...}`. Distinct
//! from channel pairing codes (see `pairing`), which bind an unknown
//! channel sender rather than a directly-connecting client.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("device not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Pending,
    Approved,
    Revoked,
}

#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub device_id: String,
    pub display_name: Option<String>,
    pub platform: String,
    /// Informational public-key material; no signature verification is
    /// performed against it yet.
    pub public_key: Option<String>,
    pub status: DeviceStatus,
    pub scopes: Vec<String>,
    pub requested_at_ms: u64,
    pub approved_at_ms: Option<u64>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Default scopes granted to a newly approved device.
const DEFAULT_SCOPES: &[&str] = &["config.read", "node.read", "voice"];

/// Pending and approved devices, keyed by device id.
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    /// Register an unknown device as pending, or return the existing entry
    /// if it has already requested access.
    pub fn request(&mut self, device_id: &str, display_name: Option<&str>, platform: &str) -> Device {
        self.devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device {
                device_id: device_id.to_string(),
                display_name: display_name.map(str::to_string),
                platform: platform.to_string(),
                public_key: None,
                status: DeviceStatus::Pending,
                scopes: Vec::new(),
                requested_at_ms: now_ms(),
                approved_at_ms: None,
            })
            .clone()
    }

    pub fn list_pending(&self) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| d.status == DeviceStatus::Pending)
            .collect()
    }

    pub fn list_approved(&self) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| d.status == DeviceStatus::Approved)
            .collect()
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn approve(&mut self, device_id: &str) -> Result<Device> {
        let device = self.devices.get_mut(device_id).ok_or(Error::NotFound)?;
        device.status = DeviceStatus::Approved;
        device.scopes = DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect();
        device.approved_at_ms = Some(now_ms());
        Ok(device.clone())
    }

    pub fn reject(&mut self, device_id: &str) -> Result<()> {
        if self.devices.remove(device_id).is_none() {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    pub fn revoke(&mut self, device_id: &str) -> Result<Device> {
        let device = self.devices.get_mut(device_id).ok_or(Error::NotFound)?;
        device.status = DeviceStatus::Revoked;
        device.scopes.clear();
        Ok(device.clone())
    }

    /// Seed an already-approved device directly, bypassing the
    /// pending/approve flow. Used once at startup to register the local
    /// admin device the hosting CLI authenticates as.
    pub fn bootstrap(&mut self, device_id: &str, display_name: &str, scopes: Vec<String>) -> Device {
        let device = Device {
            device_id: device_id.to_string(),
            display_name: Some(display_name.to_string()),
            platform: "cli".into(),
            public_key: None,
            status: DeviceStatus::Approved,
            scopes,
            requested_at_ms: now_ms(),
            approved_at_ms: Some(now_ms()),
        };
        self.devices.insert(device_id.to_string(), device.clone());
        device
    }

    /// Register a device that arrived through a channel pairing code rather
    /// than the direct `hello`/pending/approve flow. Granted the same
    /// default scopes a normal approval would assign.
    pub fn register_paired(&mut self, device_id: &str, display_name: Option<&str>, platform: &str) -> Device {
        let device = Device {
            device_id: device_id.to_string(),
            display_name: display_name.map(str::to_string),
            platform: platform.to_string(),
            public_key: None,
            status: DeviceStatus::Approved,
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            requested_at_ms: now_ms(),
            approved_at_ms: Some(now_ms()),
        };
        self.devices.insert(device_id.to_string(), device.clone());
        device
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_promotes_device_and_grants_default_scopes() {
        let mut reg = DeviceRegistry::new();
        reg.request("d1", Some("Phone"), "ios");
        let approved = reg.approve("d1").unwrap();
        assert_eq!(approved.status, DeviceStatus::Approved);
        assert!(!approved.scopes.is_empty());
        assert!(reg.list_pending().is_empty());
        assert_eq!(reg.list_approved().len(), 1);
    }

    #[test]
    fn revoke_clears_scopes() {
        let mut reg = DeviceRegistry::new();
        reg.request("d1", None, "android");
        reg.approve("d1").unwrap();
        let revoked = reg.revoke("d1").unwrap();
        assert_eq!(revoked.status, DeviceStatus::Revoked);
        assert!(revoked.scopes.is_empty());
    }

    #[test]
    fn approving_unknown_device_is_not_found() {
        let mut reg = DeviceRegistry::new();
        assert!(matches!(reg.approve("ghost"), Err(Error::NotFound)));
    }

    #[test]
    fn bootstrap_registers_device_already_approved() {
        let mut reg = DeviceRegistry::new();
        let device = reg.bootstrap("cli-admin", "conduit CLI", vec!["admin".to_string()]);
        assert_eq!(device.status, DeviceStatus::Approved);
        assert_eq!(reg.get("cli-admin").unwrap().scopes, vec!["admin".to_string()]);
    }

    #[test]
    fn register_paired_appears_in_approved_list() {
        let mut reg = DeviceRegistry::new();
        let device = reg.register_paired("dev-123", Some("WhatsApp contact"), "whatsapp");
        assert_eq!(device.status, DeviceStatus::Approved);
        assert!(!device.scopes.is_empty());
        assert_eq!(reg.list_approved().len(), 1);
        assert_eq!(reg.list_pending().len(), 0);
    }
}
