//! HTTP route handlers, grouped by surface.

pub mod blobs;
pub mod feeds;
pub mod index;
pub mod gc;
pub mod health;
pub mod node;
pub mod pins;
pub mod proofs;
