//! # corral-core
//!
//! Support library for corral - a distributed workload manager.
//!
//! This crate provides the low-level building blocks shared by the
//! controller and the compute-node daemon:
//!
//! - **Host ranges**: parse and expand compressed node-name expressions
//!   like `n[1-4,7]` ([`hostlist`])
//! - **Bitmaps**: fixed-size bit sets used for core allocation maps
//!   ([`bitmap`])
//! - **Wire packing**: typed big-endian byte-buffer codec with bounded
//!   reads ([`wire`])
//! - **Run-length helpers**: decoding of the per-node shape arrays the
//!   scheduler emits ([`runlen`])
//! - **Identity**: user/group resolution for credential enrichment
//!   ([`identity`])
//! - **Generic resources**: the per-node GRES allocation model ([`gres`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bitmap;
pub mod gres;
pub mod hostlist;
pub mod identity;
pub mod runlen;
pub mod wire;

pub use bitmap::{Bitmap, BitmapError};
pub use gres::Gres;
pub use hostlist::{Hostlist, HostlistError};
pub use identity::{Identity, IdentityError, IdentityResolver, StaticResolver, SystemResolver};
pub use wire::{PackBuf, UnpackBuf, WireError};
