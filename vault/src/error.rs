//! Error type shared across the vault engine.
//!
//! Every failure carries both a machine-readable kind (the enum variant,
//! exposed as a stable string code via [`VaultError::code`]) and a human
//! message. HTTP adapters translate codes to status lines; nothing inside
//! the engine is allowed to collapse a specific kind into [`VaultError::Internal`]
//! unless it truly has no better information.

use std::fmt;

/// Convenience alias used throughout the engine.
pub type VaultResult<T> = Result<T, VaultError>;

/// All failure kinds the engine can surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultError {
    /// Malformed request input (bad hex, bad base64, missing fields).
    InvalidRequest(String),
    /// Payload exceeds the configured per-blob size limit.
    PayloadTooLarge(String),
    /// Recomputed CID does not match the declared one.
    CidMismatch {
        declared: String,
        computed: String,
    },
    /// No blob stored under this CID.
    BlobNotFound(String),
    /// Blob exists but is on the local ban list.
    BlobBanned(String),
    /// Metadata HMAC failed verification.
    MetadataTampered(String),
    /// Replication-state HMAC failed verification.
    ReplicationStateTampered(String),
    /// The underlying filesystem is out of space.
    StorageFull(String),
    /// Accepting the blob would exceed the configured storage cap.
    CapacityExceeded(String),
    /// A garbage-collection run is already in progress.
    GcAlreadyRunning,
    /// On-disk environment marker conflicts with the process environment.
    EnvironmentMismatch {
        on_disk: String,
        current: String,
    },
    /// Node identity (public key) is not configured.
    NodeNotConfigured,
    /// The registry reports this node as not registered / inactive.
    NodeNotRegistered,
    /// The registry could not be consulted; admission fails closed.
    RegistrationCheckFailed(String),
    /// Sender is not authorized for the given app.
    Forbidden(String),
    /// Content type rejected by the content filter.
    ContentTypeRejected(String),
    /// Guild is on the blocked list.
    GuildBlocked(String),
    /// Guild is not on the allowed list.
    GuildNotAllowed(String),
    /// No feed with this id.
    FeedNotFound(String),
    /// A feed with this id already exists.
    FeedExists(String),
    /// Author is not in the feed's writer set.
    FeedUnauthorized(String),
    /// A cryptographic signature failed verification.
    InvalidSignature(String),
    /// Proof timestamp is older than the freshness window.
    ProofStale(String),
    /// Proof timestamp lies too far in the future.
    ProofInFuture(String),
    /// Caller exceeded a rate limit.
    RateLimited(String),
    /// Catch-all for failures with no more specific kind.
    Internal(String),
}

impl VaultError {
    /// Stable machine code for this error, as used by the HTTP surface.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::InvalidRequest(_) => "INVALID_REQUEST",
            VaultError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            VaultError::CidMismatch { .. } => "CID_MISMATCH",
            VaultError::BlobNotFound(_) => "BLOB_NOT_FOUND",
            VaultError::BlobBanned(_) => "BLOB_BANNED",
            VaultError::MetadataTampered(_) => "METADATA_TAMPERED",
            VaultError::ReplicationStateTampered(_) => "REPLICATION_STATE_TAMPERED",
            VaultError::StorageFull(_) => "STORAGE_FULL",
            VaultError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            VaultError::GcAlreadyRunning => "GC_ALREADY_RUNNING",
            VaultError::EnvironmentMismatch { .. } => "ENVIRONMENT_MISMATCH",
            VaultError::NodeNotConfigured => "NODE_NOT_CONFIGURED",
            VaultError::NodeNotRegistered => "NODE_NOT_REGISTERED",
            VaultError::RegistrationCheckFailed(_) => "REGISTRATION_CHECK_FAILED",
            VaultError::Forbidden(_) => "FORBIDDEN",
            VaultError::ContentTypeRejected(_) => "CONTENT_TYPE_REJECTED",
            VaultError::GuildBlocked(_) => "GUILD_BLOCKED",
            VaultError::GuildNotAllowed(_) => "GUILD_NOT_ALLOWED",
            VaultError::FeedNotFound(_) => "FEED_NOT_FOUND",
            VaultError::FeedExists(_) => "FEED_EXISTS",
            VaultError::FeedUnauthorized(_) => "FEED_UNAUTHORIZED",
            VaultError::InvalidSignature(_) => "INVALID_SIGNATURE",
            VaultError::ProofStale(_) => "PROOF_STALE",
            VaultError::ProofInFuture(_) => "PROOF_IN_FUTURE",
            VaultError::RateLimited(_) => "RATE_LIMITED",
            VaultError::Internal(_) => "INTERNAL",
        }
    }

    /// True for the integrity-failure kinds that must never be masked by
    /// recovery paths.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            VaultError::MetadataTampered(_)
                | VaultError::ReplicationStateTampered(_)
                | VaultError::CidMismatch { .. }
        )
    }
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            VaultError::PayloadTooLarge(msg) => write!(f, "payload too large: {msg}"),
            VaultError::CidMismatch { declared, computed } => {
                write!(f, "cid mismatch: declared {declared}, computed {computed}")
            }
            VaultError::BlobNotFound(cid) => write!(f, "blob not found: {cid}"),
            VaultError::BlobBanned(cid) => write!(f, "blob banned: {cid}"),
            VaultError::MetadataTampered(msg) => write!(f, "metadata tampered: {msg}"),
            VaultError::ReplicationStateTampered(msg) => {
                write!(f, "replication state tampered: {msg}")
            }
            VaultError::StorageFull(msg) => write!(f, "storage full: {msg}"),
            VaultError::CapacityExceeded(msg) => write!(f, "capacity exceeded: {msg}"),
            VaultError::GcAlreadyRunning => write!(f, "garbage collection already running"),
            VaultError::EnvironmentMismatch { on_disk, current } => write!(
                f,
                "environment mismatch: data dir initialized as {on_disk}, process runs as {current}"
            ),
            VaultError::NodeNotConfigured => write!(f, "node identity not configured"),
            VaultError::NodeNotRegistered => write!(f, "node not registered as active"),
            VaultError::RegistrationCheckFailed(msg) => {
                write!(f, "registration check failed: {msg}")
            }
            VaultError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            VaultError::ContentTypeRejected(msg) => write!(f, "content type rejected: {msg}"),
            VaultError::GuildBlocked(guild) => write!(f, "guild blocked: {guild}"),
            VaultError::GuildNotAllowed(guild) => write!(f, "guild not allowed: {guild}"),
            VaultError::FeedNotFound(id) => write!(f, "feed not found: {id}"),
            VaultError::FeedExists(id) => write!(f, "feed already exists: {id}"),
            VaultError::FeedUnauthorized(msg) => write!(f, "feed unauthorized: {msg}"),
            VaultError::InvalidSignature(msg) => write!(f, "invalid signature: {msg}"),
            VaultError::ProofStale(msg) => write!(f, "proof too old: {msg}"),
            VaultError::ProofInFuture(msg) => write!(f, "proof timestamp in future: {msg}"),
            VaultError::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            VaultError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for VaultError {}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::StorageFull {
            VaultError::StorageFull(e.to_string())
        } else {
            VaultError::Internal(format!("io error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_screaming_snake() {
        let samples = [
            VaultError::InvalidRequest("x".into()),
            VaultError::BlobNotFound("abc".into()),
            VaultError::GcAlreadyRunning,
            VaultError::NodeNotConfigured,
        ];
        for e in samples {
            let code = e.code();
            assert!(!code.is_empty());
            assert!(
                code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "unexpected code: {code}"
            );
        }
    }

    #[test]
    fn integrity_failures_are_flagged() {
        assert!(VaultError::MetadataTampered("m".into()).is_integrity_failure());
        assert!(
            VaultError::CidMismatch {
                declared: "a".into(),
                computed: "b".into()
            }
            .is_integrity_failure()
        );
        assert!(!VaultError::BlobNotFound("c".into()).is_integrity_failure());
    }
}
