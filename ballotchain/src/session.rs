use crate::*;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Resolves session tokens issued by the authentication frontend
pub trait SessionValidator: Send + Sync {
    fn user(&self, token: &str) -> Option<User>;
}

/// Sessions held in memory, registered by whoever issues them
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<String, User>>,
}

impl SessionTable {
    pub fn new() -> Self {
        SessionTable::default()
    }

    pub fn insert(&self, token: impl Into<String>, user: User) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), user);
    }

    pub fn revoke(&self, token: &str) -> Option<User> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
    }
}

impl SessionValidator for SessionTable {
    fn user(&self, token: &str) -> Option<User> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }
}
