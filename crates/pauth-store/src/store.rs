//! `UserStore` and `TokenStore`: the narrow interface spec.md §4.4 asks for
//! (insert / find / update-field / update-array-element-by-match / delete /
//! push-to-array), collapsed into the two operations the protocol handler
//! actually needs per collection, plus an in-memory implementation of each.
//!
//! Both traits are `Send + Sync + 'static` so a single instance can be held
//! behind an `Arc` and shared across every connection task.

use crate::models::{Device, TempToken, User};
use pauth_common::error::ProtocolError;
use std::collections::HashMap;
use std::sync::Mutex;

/// The `users` collection: `_id = username`.
pub trait UserStore: Send + Sync + 'static {
    /// Insert a newly registered user. Fails with
    /// [`ProtocolError::UsernameAlreadyExists`] if the id is taken.
    fn insert(&self, user: User) -> Result<(), ProtocolError>;

    /// Find a user by username.
    fn find(&self, username: &str) -> Option<User>;

    /// Flip `logged` on the named device (update-array-element-by-match).
    /// No-op if the user or device does not exist.
    fn set_device_logged(&self, username: &str, device_name: &str, logged: bool);

    /// Atomically append a new device to a user's device list
    /// (push-to-array). The whole read-modify-write happens under one lock
    /// so two concurrent pairing confirmations for the same user can never
    /// clobber each other.
    fn push_device(&self, username: &str, device: Device) -> Result<(), ProtocolError>;
}

/// The `temp_tokens` collection: `_id = token`.
pub trait TokenStore: Send + Sync + 'static {
    /// Insert a freshly minted pairing token.
    fn insert(&self, token: TempToken);

    /// Look up a token by id. Does not itself evict expired entries — the
    /// caller decides whether "present but expired" and "absent" are
    /// distinguished (spec.md §7: `TOKEN_INVALID_OR_EXPIRED` vs `UNAUTHORIZED`).
    fn find(&self, token: &str) -> Option<TempToken>;

    /// Delete a token, consumed or expired. No-op if absent.
    fn delete(&self, token: &str);
}

/// In-memory `UserStore`, guarded by a single `std::sync::Mutex`. The lock
/// is never held across an `.await` point — every method here is
/// synchronous and returns before the caller's next suspension.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for InMemoryUserStore {
    fn insert(&self, user: User) -> Result<(), ProtocolError> {
        let mut users = self.users.lock().expect("user store mutex poisoned");
        if users.contains_key(&user.id) {
            return Err(ProtocolError::UsernameAlreadyExists);
        }
        users.insert(user.id.clone(), user);
        Ok(())
    }

    fn find(&self, username: &str) -> Option<User> {
        self.users
            .lock()
            .expect("user store mutex poisoned")
            .get(username)
            .cloned()
    }

    fn set_device_logged(&self, username: &str, device_name: &str, logged: bool) {
        let mut users = self.users.lock().expect("user store mutex poisoned");
        if let Some(user) = users.get_mut(username) {
            if let Some(device) = user.devices.iter_mut().find(|d| d.device_name == device_name) {
                device.logged = logged;
            }
        }
    }

    fn push_device(&self, username: &str, device: Device) -> Result<(), ProtocolError> {
        let mut users = self.users.lock().expect("user store mutex poisoned");
        let user = users.get_mut(username).ok_or(ProtocolError::UsernameNotFound)?;
        if user.devices.iter().any(|d| d.device_name == device.device_name) {
            return Err(ProtocolError::DeviceAlreadyRegistered);
        }
        user.devices.push(device);
        Ok(())
    }
}

/// In-memory `TokenStore`, same locking discipline as [`InMemoryUserStore`].
#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<String, TempToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn insert(&self, token: TempToken) {
        self.tokens
            .lock()
            .expect("token store mutex poisoned")
            .insert(token.id.clone(), token);
    }

    fn find(&self, token: &str) -> Option<TempToken> {
        self.tokens
            .lock()
            .expect("token store mutex poisoned")
            .get(token)
            .cloned()
    }

    fn delete(&self, token: &str) {
        self.tokens.lock().expect("token store mutex poisoned").remove(token);
    }
}
