//! Credential context: the subsystem's process-wide state.
//!
//! Everything the original design keeps in process globals — the active
//! signing backend, the freshness window, the restart timestamp, the
//! identity-enrichment switches, and the broadcast anti-replay cache —
//! lives in one [`CredContext`], threaded through the credential APIs.
//! Wire formats and algorithms do not depend on how the state is carried.
//!
//! Mutex poisoning indicates a panic in another thread, which is
//! unrecoverable.

#![allow(clippy::missing_panics_doc)]

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use corral_core::identity::{IdentityResolver, SystemResolver};

use crate::backend::{signer_for, Signer};
use crate::config::CredConfig;
use crate::error::CredError;
use crate::sbcast::SbcastCacheEntry;

/// Current wall-clock time in unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Process-wide credential state.
///
/// Construction is the `init` of the original design: the backend loads
/// here, the restart timestamp is fixed here, and dropping the context is
/// `fini`. Backend operations after construction take no lock — backends
/// are required to be reentrant.
pub struct CredContext {
    signer: Arc<dyn Signer>,
    resolver: Arc<dyn IdentityResolver>,
    expire_secs: u64,
    restart_time: u64,
    enable_nss: bool,
    send_gids: bool,
    sbcast_cache: Mutex<Vec<SbcastCacheEntry>>,
}

impl CredContext {
    /// Builds a context from configuration, resolving identities against
    /// the local passwd/group database.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::BackendUnavailable`] when the configured
    /// signer name is unknown.
    pub fn new(config: &CredConfig) -> Result<Self, CredError> {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Builds a context with a caller-supplied identity resolver.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::BackendUnavailable`] when the configured
    /// signer name is unknown.
    pub fn with_resolver(
        config: &CredConfig,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Result<Self, CredError> {
        let signer = signer_for(&config.signer)?;
        Ok(Self::with_signer(config, signer, resolver))
    }

    /// Builds a context around an already-constructed backend, e.g. an
    /// ed25519 signer holding a persistent key.
    #[must_use]
    pub fn with_signer(
        config: &CredConfig,
        signer: Arc<dyn Signer>,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        let (enable_nss, send_gids) = config.launch_flags();
        Self {
            signer,
            resolver,
            expire_secs: config.expire_window(),
            restart_time: unix_now(),
            enable_nss,
            send_gids,
            sbcast_cache: Mutex::new(Vec::new()),
        }
    }

    /// The credential freshness window, in seconds.
    #[must_use]
    pub const fn expiration(&self) -> u64 {
        self.expire_secs
    }

    /// When this context was constructed (unix seconds); a lower bound on
    /// the age of any credential this process has verified.
    #[must_use]
    pub const fn restart_time(&self) -> u64 {
        self.restart_time
    }

    /// The active signing backend.
    #[must_use]
    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }

    /// The identity resolver used for enrichment.
    #[must_use]
    pub fn resolver(&self) -> &dyn IdentityResolver {
        self.resolver.as_ref()
    }

    /// Whether credentials carry full nss passthrough identities.
    #[must_use]
    pub const fn enable_nss(&self) -> bool {
        self.enable_nss
    }

    /// Whether credentials carry resolved names and gid lists.
    #[must_use]
    pub const fn send_gids(&self) -> bool {
        self.send_gids
    }

    /// The broadcast anti-replay cache. All inserts and scans serialize
    /// on this mutex.
    pub(crate) fn sbcast_cache(&self) -> &Mutex<Vec<SbcastCacheEntry>> {
        &self.sbcast_cache
    }
}
