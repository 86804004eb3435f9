//! # corral-cred
//!
//! Signed, time-limited credentials for corral - a distributed workload
//! manager.
//!
//! The controller issues two credential flavors over one signing
//! backend:
//!
//! - **Job credentials** ([`JobCredential`]): bind a job step to a user,
//!   an allocation shape, and per-node core bitmaps. A compute node
//!   verifies authenticity and freshness, then projects the global
//!   allocation down to its own slice ([`project`]).
//! - **Broadcast credentials** ([`SbcastCred`]): authorize one
//!   file-broadcast session against a node list for a bounded window,
//!   with replay-protected reuse across file blocks ([`sbcast`]).
//!
//! All state the subsystem needs - the active [`backend::Signer`], the
//! freshness window, the identity-enrichment switches, and the broadcast
//! anti-replay cache - lives in a [`CredContext`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use corral_core::identity::{Identity, StaticResolver};
//! use corral_cred::{CredConfig, CredContext, JobCredArgs, JobCredential, StepId};
//! use corral_cred::proto::PROTOCOL_VERSION;
//!
//! # fn main() -> Result<(), corral_cred::CredError> {
//! let resolver = StaticResolver::new().with_user(1000, Identity {
//!     user_name: "alice".into(),
//!     primary_gid: 1000,
//!     gids: vec![1000],
//!     home: None,
//!     shell: None,
//! });
//! let ctx = CredContext::with_resolver(&CredConfig::default(), Arc::new(resolver))?;
//!
//! // Controller side: create and sign.
//! let mut args = JobCredArgs::new(1000, 1000, StepId::new(42, 0));
//! args.job_hostlist = "n[1-2]".into();
//! args.job_nhosts = 2;
//! let cred = JobCredential::create(&ctx, args, true, PROTOCOL_VERSION)?;
//!
//! // Node side: unpack, then check freshness.
//! let image = cred.pack(PROTOCOL_VERSION)?;
//! let received = JobCredential::unpack(&ctx, &image, PROTOCOL_VERSION)?;
//! let verified_args = received.verify(&ctx)?;
//! assert_eq!(verified_args.uid, 1000);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod args;
pub mod backend;
pub mod config;
pub mod cred;
pub mod ctx;
pub mod error;
pub mod netcred;
pub mod project;
pub mod proto;
pub mod sbcast;

pub use args::{JobCredArgs, NodeAddr, SbcastCredArgs, StepId, AUTH_NOBODY, BATCH_SCRIPT};
pub use backend::{Ed25519Signer, NullSigner, Signer};
pub use config::{CredConfig, DEFAULT_EXPIRATION_WINDOW};
pub use cred::{CredArgsGuard, JobCredential};
pub use ctx::CredContext;
pub use error::CredError;
pub use netcred::{create_net_cred, extract_net_cred};
pub use project::NodeAlloc;
pub use sbcast::{SbcastCred, SBCAST_FLAG_SHARED_OBJECT};
