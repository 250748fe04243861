//! Authorization and location-resolution seams.
//!
//! Both lookups may hit an external service, so they are async. The
//! in-tree implementation is a static directory loaded from settings.

use std::collections::HashMap;

use async_trait::async_trait;
use skycast_core::{LocationError, LocationKey};
use skycast_settings::SubscriberSettings;

/// What a client presented when connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token, if any.
    pub token: Option<String>,
}

impl Credentials {
    /// Credentials carrying `token`.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// No credentials at all.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Username the credentials map to.
    pub username: String,
}

/// Resolves credentials to a principal.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// `None` means unauthenticated.
    async fn authorize(&self, credentials: &Credentials) -> Option<Principal>;
}

/// Resolves a principal to the one location it subscribes to.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    /// `None` means no location configured.
    async fn resolve(&self, principal: &Principal) -> Option<LocationKey>;
}

#[derive(Debug, Clone)]
struct Entry {
    principal: Principal,
    location: Option<LocationKey>,
}

/// Token → user → location directory built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    by_token: HashMap<String, Entry>,
    by_user: HashMap<String, Option<LocationKey>>,
}

impl StaticDirectory {
    /// Build from subscriber settings, normalizing each location name.
    pub fn from_settings(subscribers: &[SubscriberSettings]) -> Result<Self, LocationError> {
        let mut directory = Self::default();
        for sub in subscribers {
            let location = sub
                .location
                .as_deref()
                .map(LocationKey::from_name)
                .transpose()?;
            directory.insert(&sub.token, &sub.username, location);
        }
        Ok(directory)
    }

    /// Add or replace one subscriber.
    pub fn insert(&mut self, token: &str, username: &str, location: Option<LocationKey>) {
        let principal = Principal {
            username: username.to_string(),
        };
        let _ = self.by_user.insert(username.to_string(), location.clone());
        let _ = self
            .by_token
            .insert(token.to_string(), Entry { principal, location });
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    /// Whether no subscriber is configured.
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[async_trait]
impl Authorizer for StaticDirectory {
    async fn authorize(&self, credentials: &Credentials) -> Option<Principal> {
        let token = credentials.token.as_deref()?;
        self.by_token.get(token).map(|e| e.principal.clone())
    }
}

#[async_trait]
impl LocationResolver for StaticDirectory {
    async fn resolve(&self, principal: &Principal) -> Option<LocationKey> {
        self.by_user.get(&principal.username).cloned().flatten()
    }
}
