//! Cached availability of the secondary chat provider.
//!
//! The provider is probed at most once per installation. The result lives
//! in memory for the life of the process and in the store's key-value side
//! channel across runs. Once marked unavailable it stays that way until
//! [`CapabilityCache::reset`] is called.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use relay_core::store::MessageStore;

use crate::source::MessageSource;

const UNKNOWN: u8 = 0;
const AVAILABLE: u8 = 1;
const UNAVAILABLE: u8 = 2;

/// Name of the secondary chat provider capability.
pub const SECONDARY_PROVIDER: &str = "im_provider";

/// Persisted view of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityStatus {
    Unchecked,
    Available,
    Unavailable,
}

impl CapabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityStatus::Unchecked => "unchecked",
            CapabilityStatus::Available => "available",
            CapabilityStatus::Unavailable => "unavailable",
        }
    }
}

pub struct CapabilityCache {
    name: String,
    state: AtomicU8,
    store: Arc<dyn MessageStore>,
}

impl CapabilityCache {
    pub fn new(name: impl Into<String>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(UNKNOWN),
            store,
        }
    }

    /// Cache for the secondary chat provider.
    pub fn secondary(store: Arc<dyn MessageStore>) -> Self {
        Self::new(SECONDARY_PROVIDER, store)
    }

    fn checked_key(&self) -> String {
        format!("capability.{}.checked", self.name)
    }

    fn available_key(&self) -> String {
        format!("capability.{}.available", self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve availability: in-memory state first, then the persisted
    /// result, then a live probe of `source` whose result is persisted.
    pub async fn probe(&self, source: &dyn MessageSource) -> bool {
        match self.state.load(Ordering::Acquire) {
            AVAILABLE => return true,
            UNAVAILABLE => return false,
            _ => {}
        }

        match self.status().await {
            Ok(CapabilityStatus::Available) => {
                self.state.store(AVAILABLE, Ordering::Release);
                return true;
            }
            Ok(CapabilityStatus::Unavailable) => {
                self.state.store(UNAVAILABLE, Ordering::Release);
                return false;
            }
            Ok(CapabilityStatus::Unchecked) => {}
            Err(e) => {
                warn!(capability = %self.name, error = %e, "could not read persisted capability");
            }
        }

        let available = match source.probe_secondary().await {
            Ok(available) => available,
            Err(e) => {
                debug!(capability = %self.name, error = %e, "capability probe failed");
                false
            }
        };
        info!(capability = %self.name, available, "capability probed");
        self.record(available).await;
        available
    }

    /// In-memory answer only; `false` until [`probe`](Self::probe) has run.
    pub fn is_available(&self) -> bool {
        self.state.load(Ordering::Acquire) == AVAILABLE
    }

    /// Disable the capability for this and all later runs.
    pub async fn mark_unavailable(&self) {
        if self.state.swap(UNAVAILABLE, Ordering::AcqRel) != UNAVAILABLE {
            warn!(capability = %self.name, "capability marked unavailable");
        }
        self.persist(false).await;
    }

    /// Forget both the in-memory and persisted result.
    pub async fn reset(&self) -> Result<()> {
        self.state.store(UNKNOWN, Ordering::Release);
        self.store.delete_meta(&self.checked_key()).await?;
        self.store.delete_meta(&self.available_key()).await?;
        Ok(())
    }

    /// Persisted status, ignoring the in-memory state.
    pub async fn status(&self) -> Result<CapabilityStatus> {
        let checked = self.store.get_meta(&self.checked_key()).await?;
        if checked.as_deref() != Some("true") {
            return Ok(CapabilityStatus::Unchecked);
        }
        let available = self.store.get_meta(&self.available_key()).await?;
        Ok(if available.as_deref() == Some("true") {
            CapabilityStatus::Available
        } else {
            CapabilityStatus::Unavailable
        })
    }

    async fn record(&self, available: bool) {
        let state = if available { AVAILABLE } else { UNAVAILABLE };
        // A concurrent mark_unavailable wins over a stale positive probe.
        let _ = self
            .state
            .compare_exchange(UNKNOWN, state, Ordering::AcqRel, Ordering::Acquire);
        self.persist(self.is_available()).await;
    }

    async fn persist(&self, available: bool) {
        let result = async {
            self.store.set_meta(&self.checked_key(), "true").await?;
            self.store
                .set_meta(&self.available_key(), if available { "true" } else { "false" })
                .await
        }
        .await;
        if let Err(e) = result {
            warn!(capability = %self.name, error = %e, "could not persist capability");
        }
    }
}
