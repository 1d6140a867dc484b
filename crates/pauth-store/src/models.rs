//! Persisted shapes: [`Device`]/[`User`] and [`TempToken`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One enrolled key for a user. `main_device` is true for exactly one
/// device per user — the one enrolled at registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub pk: String,
    pub device_name: String,
    pub main_device: bool,
    pub logged: bool,
}

impl Device {
    pub fn primary(pk: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            device_name: device_name.into(),
            main_device: true,
            logged: true,
        }
    }

    pub fn secondary(pk: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            device_name: device_name.into(),
            main_device: false,
            logged: true,
        }
    }
}

/// A registered account: a username and its ordered, non-empty device list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub devices: Vec<Device>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, first_device: Device, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            devices: vec![first_device],
            created_at,
        }
    }

    pub fn device_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_name == name)
    }

    pub fn is_main_device(&self, name: &str) -> bool {
        self.device_by_name(name).is_some_and(|d| d.main_device)
    }
}

/// A short-lived, one-time pairing token minted on `ASSOC_REQUEST`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempToken {
    pub id: String,
    pub pk: String,
    pub device_name: String,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl TempToken {
    pub const TTL_MINUTES: i64 = 10;

    pub fn new(id: impl Into<String>, pk: impl Into<String>, device_name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::with_ttl(id, pk, device_name, created_at, Self::TTL_MINUTES)
    }

    /// Same as [`Self::new`] but with an explicit TTL, for deployments that
    /// override `pairing_token_ttl_minutes` away from the 10-minute default.
    pub fn with_ttl(
        id: impl Into<String>,
        pk: impl Into<String>,
        device_name: impl Into<String>,
        created_at: DateTime<Utc>,
        ttl_minutes: i64,
    ) -> Self {
        Self {
            id: id.into(),
            pk: pk.into(),
            device_name: device_name.into(),
            created_at,
            expiry: created_at + Duration::minutes(ttl_minutes),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }
}
