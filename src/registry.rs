//! Device Registry (spec.md §4.A).
//!
//! Grounded on `state.rs`'s `get_or_create_broadcast` check-then-insert
//! dance: a read lock first, then a write lock with a re-check, so the
//! common case (link already exists) never contends for the write lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::homebase::{self, HomebaseLinkHandle, LinkContext};

/// Owns the set of live Homebase Links, keyed by device address.
#[derive(Clone)]
pub struct DeviceRegistry {
    links: Arc<RwLock<HashMap<String, HomebaseLinkHandle>>>,
    allowed_ips: Arc<Vec<String>>,
    ctx: LinkContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotAllowed;

impl std::fmt::Display for NotAllowed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "address is not in the homebase allow-list")
    }
}
impl std::error::Error for NotAllowed {}

impl DeviceRegistry {
    pub fn new(ctx: LinkContext, allowed_ips: Vec<String>) -> Self {
        Self {
            links: Arc::new(RwLock::new(HashMap::new())),
            allowed_ips: Arc::new(allowed_ips),
            ctx,
        }
    }

    fn is_allowed(&self, address: &str) -> bool {
        self.allowed_ips.is_empty() || self.allowed_ips.iter().any(|a| a == address)
    }

    /// Return the existing Link for `address`, or construct and start a
    /// new one (spec.md §4.A `ensure`). Rejects addresses outside a
    /// non-empty allow-list.
    pub async fn ensure(&self, address: &str) -> Result<HomebaseLinkHandle, NotAllowed> {
        if !self.is_allowed(address) {
            return Err(NotAllowed);
        }

        {
            let links = self.links.read().await;
            if let Some(handle) = links.get(address) {
                return Ok(handle.clone());
            }
        }

        let mut links = self.links.write().await;
        if let Some(handle) = links.get(address) {
            return Ok(handle.clone());
        }

        info!(address = %address, "starting homebase link");
        let handle = homebase::spawn(address.to_owned(), self.ctx.clone());
        links.insert(address.to_owned(), handle.clone());
        Ok(handle)
    }

    /// All addresses with a live (or starting) Link.
    pub async fn known_addresses(&self) -> Vec<String> {
        self.links.read().await.keys().cloned().collect()
    }
}
