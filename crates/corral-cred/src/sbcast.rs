//! Broadcast credentials and the anti-replay cache.
//!
//! A broadcast credential authorizes one file-broadcast session against a
//! node list for a bounded window. The signature can only be fully
//! verified once per receipt, yet a legitimate broadcast issues many RPCs
//! bearing the same credential — one per file block. Block one pays the
//! full verification cost and seeds the process-wide cache with
//! `(expiration, signature-hash)`; subsequent blocks are admitted on an
//! exact cache match and rejected as replays otherwise. Expired cache
//! records are purged opportunistically as scans visit them.
//!
//! Mutex poisoning indicates a panic in another thread, which is
//! unrecoverable.

#![allow(clippy::missing_panics_doc)]

use bytes::Bytes;
use corral_core::wire::{PackBuf, UnpackBuf};

use crate::args::{SbcastCredArgs, AUTH_NOBODY};
use crate::ctx::{unix_now, CredContext};
use crate::error::CredError;
use crate::proto::{self, ProtocolVersion};

/// Overwrite the destination even if it exists.
pub const SBCAST_FLAG_FORCE: u16 = 1 << 0;

/// This block completes the transfer.
pub const SBCAST_FLAG_LAST_BLOCK: u16 = 1 << 1;

/// The file is a shared object accompanying an executable; every block
/// is admitted through the cache rather than one-shot verification.
pub const SBCAST_FLAG_SHARED_OBJECT: u16 = 1 << 2;

/// One anti-replay cache record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcastCacheEntry {
    /// Expiration of the credential that seeded the record.
    pub expire: u64,
    /// Hash of the credential's signature.
    pub value: u32,
}

/// Weak digest keying the anti-replay cache: sum of big-endian 16-bit
/// pairs, wrapping. An odd trailing byte contributes its high half.
///
/// Collisions are harmless — the cache grants freshness-replay tolerance,
/// never authority, and a colliding signature must also carry an
/// identical, still-future expiration.
#[must_use]
pub fn sig_hash(signature: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for pair in signature.chunks(2) {
        let hi = u32::from(pair[0]) << 8;
        let lo = pair.get(1).map_or(0, |&b| u32::from(b));
        hash = hash.wrapping_add(hi + lo);
    }
    hash
}

/// A signed, time-limited file-broadcast authorization.
///
/// Unlike a job credential the object is used only transiently on
/// receipt, so it carries no lock.
#[derive(Debug, Clone)]
pub struct SbcastCred {
    ctime: u64,
    expiration: u64,
    job_id: u32,
    het_job_id: u32,
    step_id: u32,
    uid: u32,
    gid: u32,
    user_name: Option<String>,
    gids: Vec<u32>,
    nodes: String,
    signature: Vec<u8>,
    verified: bool,
}

impl SbcastCred {
    /// Creates and signs a broadcast credential.
    ///
    /// When gid sending is enabled the user name and supplementary gid
    /// list are resolved through the context's identity resolver,
    /// overriding whatever the caller supplied.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::Signing`] when the backend cannot sign;
    /// signing failure is terminal.
    pub fn create(
        ctx: &CredContext,
        args: &SbcastCredArgs,
        proto: ProtocolVersion,
    ) -> Result<Self, CredError> {
        Self::create_at(ctx, args, proto, unix_now())
    }

    /// [`create`](Self::create) with an explicit creation time.
    ///
    /// # Errors
    ///
    /// As for [`create`](Self::create).
    pub fn create_at(
        ctx: &CredContext,
        args: &SbcastCredArgs,
        proto: ProtocolVersion,
        now: u64,
    ) -> Result<Self, CredError> {
        if !proto::is_supported(proto) {
            return Err(CredError::UnsupportedVersion(proto));
        }

        let mut cred = Self {
            ctime: now,
            expiration: args.expiration,
            job_id: args.job_id,
            het_job_id: args.het_job_id,
            step_id: args.step_id,
            uid: args.uid,
            gid: args.gid,
            user_name: args.user_name.clone(),
            gids: args.gids.clone(),
            nodes: args.nodes.clone(),
            signature: Vec::new(),
            verified: false,
        };

        if ctx.send_gids() {
            // May still come up empty; the receiving daemon resolves then.
            cred.user_name = ctx
                .resolver()
                .fetch(args.uid, args.gid, false)
                .ok()
                .map(|id| id.user_name);
            match ctx
                .resolver()
                .group_list(args.uid, args.gid, cred.user_name.as_deref())
            {
                Ok(gids) => cred.gids = gids,
                Err(e) => {
                    tracing::warn!(uid = args.uid, error = %e, "gid list lookup failed");
                }
            }
        }

        let mut body = PackBuf::with_capacity(512);
        cred.pack_body(&mut body, proto);
        cred.signature = ctx.signer().sign(body.as_slice()).map_err(|e| {
            tracing::error!(job_id = args.job_id, "failed to sign broadcast credential");
            e
        })?;

        Ok(cred)
    }

    /// Packs the signed portion: the version tag and every field but the
    /// signature. Signing covers exactly these bytes.
    fn pack_body(&self, buf: &mut PackBuf, proto: ProtocolVersion) {
        if proto >= proto::MIN_PROTOCOL_VERSION {
            buf.pack_u16(proto);
            buf.pack_time(self.ctime);
            buf.pack_time(self.expiration);
            buf.pack_u32(self.job_id);
            buf.pack_u32(self.het_job_id);
            buf.pack_u32(self.step_id);
            buf.pack_u32(self.uid);
            buf.pack_u32(self.gid);
            buf.pack_str(self.user_name.as_deref());
            buf.pack_u32_array(&self.gids);
            buf.pack_str(Some(&self.nodes));
        }
    }

    /// Full wire image: body then signature.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::UnsupportedVersion`] for a version this build
    /// does not speak.
    pub fn pack(&self, proto: ProtocolVersion) -> Result<Bytes, CredError> {
        if !proto::is_supported(proto) {
            return Err(CredError::UnsupportedVersion(proto));
        }
        let mut buf = PackBuf::with_capacity(512 + self.signature.len());
        self.pack_body(&mut buf, proto);
        buf.pack_bytes(&self.signature);
        Ok(buf.into_bytes())
    }

    /// Rebuilds a broadcast credential from its wire image, verifying the
    /// signature; `verified` reflects the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::Decode`] for structurally invalid input and
    /// the version errors for a foreign tag.
    pub fn unpack(
        ctx: &CredContext,
        image: &[u8],
        proto: ProtocolVersion,
    ) -> Result<Self, CredError> {
        let mut buf = UnpackBuf::new(image);

        let version = buf.unpack_u16()?;
        if !proto::is_supported(version) {
            return Err(CredError::UnsupportedVersion(version));
        }
        if version != proto {
            return Err(CredError::ProtocolMismatch {
                requested: proto,
                cached: version,
            });
        }

        let ctime = buf.unpack_time()?;
        let expiration = buf.unpack_time()?;
        let job_id = buf.unpack_u32()?;
        let het_job_id = buf.unpack_u32()?;
        let step_id = buf.unpack_u32()?;
        let uid = buf.unpack_u32()?;
        let gid = buf.unpack_u32()?;
        let user_name = buf.unpack_str()?;
        let gids = buf.unpack_u32_array()?;
        let nodes = buf
            .unpack_str()?
            .ok_or(CredError::MissingField("broadcast node list"))?;

        let body_end = buf.consumed();
        let signature = buf.unpack_bytes()?;

        let mut verified = false;
        match ctx.signer().verify(&buf.raw()[..body_end], &signature) {
            Ok(()) => verified = true,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "broadcast credential signature rejected");
            }
        }

        Ok(Self {
            ctime,
            expiration,
            job_id,
            het_job_id,
            step_id,
            uid,
            gid,
            user_name,
            gids,
            nodes,
            signature,
            verified,
        })
    }

    /// Admits one block of a broadcast and returns the authorization
    /// payload as a fresh deep copy.
    ///
    /// Block one of a non-shared-object transfer must be freshly
    /// verified and seeds the anti-replay cache; every other block is
    /// admitted only on an exact `(expiration, signature-hash)` cache
    /// match. Expired records encountered during the scan are purged.
    ///
    /// # Errors
    ///
    /// - [`CredError::CredentialExpired`] past `expiration`, regardless
    ///   of cache state
    /// - [`CredError::InvalidCredential`] for an unverified first block
    /// - [`CredError::ReplayRejected`] on a cache miss
    /// - [`CredError::InvalidPrincipal`] for NOBODY identities
    pub fn extract(
        &self,
        ctx: &CredContext,
        block_no: u16,
        flags: u16,
    ) -> Result<SbcastCredArgs, CredError> {
        self.extract_at(ctx, block_no, flags, unix_now())
    }

    /// [`extract`](Self::extract) against an explicit clock.
    ///
    /// # Errors
    ///
    /// As for [`extract`](Self::extract).
    pub fn extract_at(
        &self,
        ctx: &CredContext,
        block_no: u16,
        flags: u16,
        now: u64,
    ) -> Result<SbcastCredArgs, CredError> {
        if now > self.expiration {
            return Err(CredError::CredentialExpired);
        }

        if block_no == 1 && (flags & SBCAST_FLAG_SHARED_OBJECT) == 0 {
            if !self.verified {
                return Err(CredError::InvalidCredential);
            }
            ctx.sbcast_cache().lock().unwrap().push(SbcastCacheEntry {
                expire: self.expiration,
                value: sig_hash(&self.signature),
            });
        } else {
            let hash = sig_hash(&self.signature);
            let mut cache = ctx.sbcast_cache().lock().unwrap();
            let mut found = false;
            let mut i = 0;
            while i < cache.len() {
                if cache[i].expire == self.expiration && cache[i].value == hash {
                    found = true;
                    break;
                }
                if cache[i].expire <= now {
                    cache.remove(i);
                } else {
                    i += 1;
                }
            }
            drop(cache);
            if !found {
                tracing::error!(
                    job_id = self.job_id,
                    block_no,
                    "broadcast credential signature not in cache"
                );
                return Err(CredError::ReplayRejected);
            }
        }

        if self.uid == AUTH_NOBODY {
            tracing::error!("refusing broadcast credential for invalid user nobody");
            return Err(CredError::InvalidPrincipal);
        }
        if self.gid == AUTH_NOBODY {
            tracing::error!("refusing broadcast credential for invalid group nobody");
            return Err(CredError::InvalidPrincipal);
        }

        Ok(SbcastCredArgs {
            job_id: self.job_id,
            het_job_id: self.het_job_id,
            step_id: self.step_id,
            uid: self.uid,
            gid: self.gid,
            user_name: self.user_name.clone(),
            gids: self.gids.clone(),
            nodes: self.nodes.clone(),
            expiration: self.expiration,
        })
    }

    /// Whether the signature has been verified.
    #[must_use]
    pub const fn verified(&self) -> bool {
        self.verified
    }

    /// Absolute expiration (unix seconds).
    #[must_use]
    pub const fn expiration(&self) -> u64 {
        self.expiration
    }

    /// Creation time (unix seconds).
    #[must_use]
    pub const fn ctime(&self) -> u64 {
        self.ctime
    }

    /// The detached signature.
    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

impl std::fmt::Display for SbcastCred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sbcast cred: job {} step {} nodes {} ctime {} expires {}",
            self.job_id, self.step_id, self.nodes, self.ctime, self.expiration
        )
    }
}
