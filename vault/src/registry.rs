//! Registry adapter: the seam to the external node/app registries.
//!
//! The engine only ever asks three questions — is this node active, is
//! this sender authorized for this app, and what minimum version does the
//! network expect — so the whole registry is abstracted as a trait.
//! Transport failures must surface as `RegistrationCheckFailed`, never as
//! a plain `false`: admission fails closed on a registry outage.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{VaultError, VaultResult};

/// Substitutable view of the node/app registries.
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    /// Whether `node_id` is currently registered and active.
    ///
    /// Implementations map transport errors to
    /// [`VaultError::RegistrationCheckFailed`]; `Ok(false)` means the
    /// registry answered and said no.
    async fn is_node_active(&self, node_id: &str) -> VaultResult<bool>;

    /// Whether `sender` may store on behalf of `app_id`.
    async fn is_sender_authorized(&self, app_id: &str, sender: &str) -> VaultResult<bool>;

    /// Minimum node version the network expects, for `/node/info`.
    fn min_version(&self) -> Option<String>;
}

/// In-memory registry backed by explicit allowlists.
///
/// Used in tests and in deployments where membership is provisioned via
/// config rather than an on-chain registry.
#[derive(Default)]
pub struct StaticRegistry {
    active_nodes: RwLock<HashSet<String>>,
    authorized_senders: RwLock<HashMap<String, HashSet<String>>>,
    min_version: Option<String>,
    /// When set, every node and sender passes. Dev-mode convenience.
    allow_all: bool,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that accepts everyone.
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            ..Self::default()
        }
    }

    pub fn with_min_version(mut self, version: impl Into<String>) -> Self {
        self.min_version = Some(version.into());
        self
    }

    pub fn add_active_node(&self, node_id: impl Into<String>) {
        self.active_nodes
            .write()
            .expect("registry lock poisoned")
            .insert(node_id.into());
    }

    pub fn remove_active_node(&self, node_id: &str) {
        self.active_nodes
            .write()
            .expect("registry lock poisoned")
            .remove(node_id);
    }

    pub fn authorize_sender(&self, app_id: impl Into<String>, sender: impl Into<String>) {
        self.authorized_senders
            .write()
            .expect("registry lock poisoned")
            .entry(app_id.into())
            .or_default()
            .insert(sender.into());
    }
}

#[async_trait]
impl RegistryAdapter for StaticRegistry {
    async fn is_node_active(&self, node_id: &str) -> VaultResult<bool> {
        if self.allow_all {
            return Ok(true);
        }
        Ok(self
            .active_nodes
            .read()
            .expect("registry lock poisoned")
            .contains(node_id))
    }

    async fn is_sender_authorized(&self, app_id: &str, sender: &str) -> VaultResult<bool> {
        if self.allow_all {
            return Ok(true);
        }
        Ok(self
            .authorized_senders
            .read()
            .expect("registry lock poisoned")
            .get(app_id)
            .is_some_and(|senders| senders.contains(sender)))
    }

    fn min_version(&self) -> Option<String> {
        self.min_version.clone()
    }
}

/// Registry stub whose checks always fail; exercises the fail-closed path.
pub struct FailingRegistry;

#[async_trait]
impl RegistryAdapter for FailingRegistry {
    async fn is_node_active(&self, _node_id: &str) -> VaultResult<bool> {
        Err(VaultError::RegistrationCheckFailed(
            "registry unreachable".into(),
        ))
    }

    async fn is_sender_authorized(&self, _app_id: &str, _sender: &str) -> VaultResult<bool> {
        Err(VaultError::RegistrationCheckFailed(
            "registry unreachable".into(),
        ))
    }

    fn min_version(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_registry_answers_membership() {
        let registry = StaticRegistry::new();
        registry.add_active_node("node-1");

        assert!(registry.is_node_active("node-1").await.unwrap());
        assert!(!registry.is_node_active("node-2").await.unwrap());

        registry.remove_active_node("node-1");
        assert!(!registry.is_node_active("node-1").await.unwrap());
    }

    #[tokio::test]
    async fn sender_authorization_is_per_app() {
        let registry = StaticRegistry::new();
        registry.authorize_sender("app-a", "alice");

        assert!(registry.is_sender_authorized("app-a", "alice").await.unwrap());
        assert!(!registry.is_sender_authorized("app-a", "bob").await.unwrap());
        assert!(!registry.is_sender_authorized("app-b", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn allow_all_bypasses_lists() {
        let registry = StaticRegistry::allow_all();
        assert!(registry.is_node_active("whoever").await.unwrap());
        assert!(registry.is_sender_authorized("any", "one").await.unwrap());
    }

    #[tokio::test]
    async fn failing_registry_fails_distinctly_from_false() {
        let registry = FailingRegistry;
        let err = registry.is_node_active("node-1").await.unwrap_err();
        assert_eq!(err.code(), "REGISTRATION_CHECK_FAILED");
    }
}
