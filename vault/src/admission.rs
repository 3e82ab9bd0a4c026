//! Store admission and retrieval ban checks.
//!
//! Admission runs before any bytes touch disk and is deliberately ordered:
//! node identity, registry membership, app authorization, then the content
//! filter. Each rejection maps to a distinct error kind so clients can
//! tell a misconfigured node apart from a policy refusal.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::config::{AdmissionConfig, ContentFilter};
use crate::error::{VaultError, VaultResult};
use crate::registry::RegistryAdapter;
use crate::types::Cid;

/// Per-request context evaluated by [`AdmissionPolicy::check_store`].
#[derive(Clone, Debug, Default)]
pub struct StoreContext {
    pub app_id: Option<String>,
    pub sender: Option<String>,
    pub content_type: Option<String>,
    pub guild_id: Option<String>,
}

/// Store admission predicate configured from the node config.
pub struct AdmissionPolicy {
    cfg: AdmissionConfig,
    filter: ContentFilter,
    registry: Arc<dyn RegistryAdapter>,
    /// Configured identity; `None` refuses every store.
    node_public_key: Option<String>,
    node_id: Option<String>,
}

impl AdmissionPolicy {
    pub fn new(
        cfg: AdmissionConfig,
        filter: ContentFilter,
        registry: Arc<dyn RegistryAdapter>,
        node_public_key: Option<String>,
        node_id: Option<String>,
    ) -> Self {
        Self {
            cfg,
            filter,
            registry,
            node_public_key,
            node_id,
        }
    }

    /// Full admission pipeline for an outside store request.
    pub async fn check_store(&self, ctx: &StoreContext) -> VaultResult<()> {
        if self.node_public_key.is_none() {
            return Err(VaultError::NodeNotConfigured);
        }

        self.check_node_registered().await?;

        if self.cfg.require_app_registry {
            let (Some(app_id), Some(sender)) = (ctx.app_id.as_deref(), ctx.sender.as_deref())
            else {
                return Err(VaultError::Forbidden(
                    "app registry enforcement requires appId and sender".into(),
                ));
            };
            let authorized = self
                .registry
                .is_sender_authorized(app_id, sender)
                .await
                .map_err(as_registration_failure)?;
            if !authorized {
                return Err(VaultError::Forbidden(format!(
                    "sender {sender} is not authorized for app {app_id}"
                )));
            }
        }

        if !self.cfg.allowed_apps.is_empty() {
            let allowed = ctx
                .app_id
                .as_deref()
                .is_some_and(|app| self.cfg.allowed_apps.iter().any(|a| a == app));
            if !allowed {
                return Err(VaultError::Forbidden("app is not on the allow list".into()));
            }
        }

        self.check_content_filter(ctx)?;
        Ok(())
    }

    /// Registry gate used by both stores and inbound replication.
    pub async fn check_node_registered(&self) -> VaultResult<()> {
        let node_id = self
            .node_id
            .as_deref()
            .or(self.node_public_key.as_deref())
            .ok_or(VaultError::NodeNotConfigured)?;

        let active = self
            .registry
            .is_node_active(node_id)
            .await
            .map_err(as_registration_failure)?;
        if !active {
            return Err(VaultError::NodeNotRegistered);
        }
        Ok(())
    }

    /// Verifies a replicating peer against the registry.
    pub async fn check_peer_registered(&self, peer_id: &str) -> VaultResult<()> {
        let active = self
            .registry
            .is_node_active(peer_id)
            .await
            .map_err(as_registration_failure)?;
        if !active {
            return Err(VaultError::NodeNotRegistered);
        }
        Ok(())
    }

    fn check_content_filter(&self, ctx: &StoreContext) -> VaultResult<()> {
        if let Some(types) = self.filter.types.as_ref() {
            let accepted = ctx
                .content_type
                .as_deref()
                .is_some_and(|ct| types.iter().any(|t| t == ct));
            if !accepted {
                return Err(VaultError::ContentTypeRejected(
                    ctx.content_type.clone().unwrap_or_else(|| "<none>".into()),
                ));
            }
        }

        if let Some(guild) = ctx.guild_id.as_deref() {
            if self.filter.blocked_guilds.iter().any(|g| g == guild) {
                return Err(VaultError::GuildBlocked(guild.to_string()));
            }
            if let Some(allowed) = self.filter.allowed_guilds.as_ref() {
                if !allowed.iter().any(|g| g == guild) {
                    return Err(VaultError::GuildNotAllowed(guild.to_string()));
                }
            }
        } else if self.filter.allowed_guilds.is_some() {
            return Err(VaultError::GuildNotAllowed("<none>".into()));
        }

        Ok(())
    }
}

fn as_registration_failure(e: VaultError) -> VaultError {
    match e {
        VaultError::RegistrationCheckFailed(_) => e,
        other => VaultError::RegistrationCheckFailed(other.to_string()),
    }
}

/// Local ban list consulted on retrieval when blocked-content handling is
/// enabled. Never touches the blobs themselves.
pub struct BanList {
    enabled: bool,
    banned: RwLock<HashSet<Cid>>,
}

impl BanList {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            banned: RwLock::new(HashSet::new()),
        }
    }

    /// Fails with `BlobBanned` when the CID is banned and enforcement is on.
    pub fn check(&self, cid: &Cid) -> VaultResult<()> {
        if self.enabled
            && self
                .banned
                .read()
                .expect("ban list lock poisoned")
                .contains(cid)
        {
            return Err(VaultError::BlobBanned(cid.to_hex()));
        }
        Ok(())
    }

    pub fn ban(&self, cid: Cid) {
        self.banned
            .write()
            .expect("ban list lock poisoned")
            .insert(cid);
    }

    pub fn unban(&self, cid: &Cid) {
        self.banned
            .write()
            .expect("ban list lock poisoned")
            .remove(cid);
    }

    pub fn list(&self) -> Vec<Cid> {
        let mut cids: Vec<Cid> = self
            .banned
            .read()
            .expect("ban list lock poisoned")
            .iter()
            .copied()
            .collect();
        cids.sort();
        cids
    }
}
