//! In-memory repositories.
//!
//! One [`MemoryDb`] implements every repository trait over shared state, so
//! promotion can touch users and pending users atomically just like the
//! `PostgreSQL` transaction does. Used by tests and local development.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ec_relate_core::{Email, PendingUserId, UserId};

use super::{MetaKey, PendingUserRepository, RepositoryError, UserMetaRepository, UserRepository};
use crate::models::{NewPendingUser, PendingUser, User};

#[derive(Default)]
struct State {
    next_id: i64,
    users: Vec<(User, String)>,
    meta: HashMap<(UserId, MetaKey), String>,
    pending: Vec<PendingUser>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_user(
        &mut self,
        email: &Email,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        if self.users.iter().any(|(u, _)| u.email.matches(email)) {
            return Err(RepositoryError::Conflict("email already exists".to_string()));
        }
        let user = User {
            id: UserId::new(self.next_id()),
            email: email.clone(),
            display_name: display_name.to_string(),
            created_at: Utc::now(),
        };
        self.users.push((user.clone(), password_hash.to_string()));
        Ok(user)
    }
}

/// Shared in-memory store.
#[derive(Default)]
pub struct MemoryDb {
    state: Mutex<State>,
}

impl MemoryDb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Backdate a pending registration (for pruning).
    pub fn set_pending_created_at(&self, id: PendingUserId, at: DateTime<Utc>) {
        if let Some(p) = self.lock().pending.iter_mut().find(|p| p.id == id) {
            p.created_at = at;
        }
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }
}

#[async_trait]
impl UserRepository for MemoryDb {
    async fn find_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|(u, _)| u.email.matches(email))
            .map(|(u, _)| u.clone()))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(u, _)| u.clone()))
    }

    async fn password_hash(&self, id: UserId) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(_, h)| h.clone()))
    }

    async fn create(
        &self,
        email: &Email,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        self.lock().insert_user(email, display_name, password_hash)
    }
}

#[async_trait]
impl UserMetaRepository for MemoryDb {
    async fn get(&self, user: UserId, key: MetaKey) -> Result<Option<String>, RepositoryError> {
        Ok(self.lock().meta.get(&(user, key)).cloned())
    }

    async fn set(&self, user: UserId, key: MetaKey, value: &str) -> Result<(), RepositoryError> {
        self.lock().meta.insert((user, key), value.to_string());
        Ok(())
    }

    async fn delete(&self, user: UserId, key: MetaKey) -> Result<(), RepositoryError> {
        self.lock().meta.remove(&(user, key));
        Ok(())
    }
}

#[async_trait]
impl PendingUserRepository for MemoryDb {
    async fn create(&self, new: NewPendingUser) -> Result<PendingUser, RepositoryError> {
        let mut state = self.lock();
        let pending = PendingUser {
            id: PendingUserId::new(state.next_id()),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            issued_token: new.issued_token,
            created_at: Utc::now(),
            used_by: None,
        };
        state.pending.push(pending.clone());
        Ok(pending)
    }

    async fn find_unused_by_email(
        &self,
        email: &Email,
    ) -> Result<Option<PendingUser>, RepositoryError> {
        Ok(self
            .lock()
            .pending
            .iter()
            .filter(|p| !p.is_used() && p.email.matches(email))
            .max_by_key(|p| (p.created_at, p.id))
            .cloned())
    }

    async fn promote(
        &self,
        id: PendingUserId,
        customer_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let mut state = self.lock();
        let Some(pending) = state
            .pending
            .iter()
            .find(|p| p.id == id && !p.is_used())
            .cloned()
        else {
            return Ok(None);
        };

        let user = state.insert_user(&pending.email, &pending.name, &pending.password_hash)?;
        if let Some(p) = state.pending.iter_mut().find(|p| p.id == id) {
            p.used_by = Some(customer_id.to_string());
        }
        Ok(Some(user))
    }

    async fn prune_unused_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.lock();
        let before = state.pending.len();
        state
            .pending
            .retain(|p| p.is_used() || p.created_at >= cutoff);
        Ok(u64::try_from(before - state.pending.len()).unwrap_or(u64::MAX))
    }
}
