//! Job credential lifecycle.
//!
//! A [`JobCredential`] binds a [`JobCredArgs`] bundle to a creation time
//! and a detached signature, and caches the exact wire image it was
//! packed into. The image is authoritative: re-packing copies the cached
//! bytes, never re-runs the backend, so the bytes a node verifies are the
//! bytes the controller signed.
//!
//! Concurrency: one reader/writer lock guards the whole inner state.
//! Readers ([`JobCredential::get_args`], [`JobCredential::verify_at`],
//! projection) share the lock; dropping the credential requires exclusive
//! ownership, so Rust's ownership rules stand in for the write lock the
//! original takes on destroy.
//!
//! Mutex poisoning indicates a panic in another thread, which is
//! unrecoverable.

#![allow(clippy::missing_panics_doc)]

use std::ops::Deref;
use std::sync::{RwLock, RwLockReadGuard};

use bytes::Bytes;
use corral_core::bitmap::Bitmap;
use corral_core::gres::Gres;
use corral_core::identity::Identity;
use corral_core::runlen;
use corral_core::wire::{PackBuf, UnpackBuf};

use crate::args::{JobCredArgs, NodeAddr, AUTH_NOBODY};
use crate::ctx::{unix_now, CredContext};
use crate::error::CredError;
use crate::project::{self, NodeAlloc};
use crate::proto::{self, ProtocolVersion};

struct CredInner {
    arg: JobCredArgs,
    ctime: u64,
    verified: bool,
    buffer: Bytes,
    buf_version: ProtocolVersion,
    signature: Vec<u8>,
}

/// A signed, time-limited job-step authorization token.
pub struct JobCredential {
    inner: RwLock<CredInner>,
}

/// Read-locked view of a credential's argument bundle.
///
/// The credential's read lock is held for the guard's lifetime; drop it
/// to release. Clone out anything needed past the borrow.
pub struct CredArgsGuard<'a> {
    guard: RwLockReadGuard<'a, CredInner>,
}

impl Deref for CredArgsGuard<'_> {
    type Target = JobCredArgs;

    fn deref(&self) -> &JobCredArgs {
        &self.guard.arg
    }
}

impl CredArgsGuard<'_> {
    /// Creation time of the credential (unix seconds).
    #[must_use]
    pub fn ctime(&self) -> u64 {
        self.guard.ctime
    }
}

impl JobCredential {
    /// Creates a credential over `args`, signing when `sign_it` is set.
    ///
    /// # Errors
    ///
    /// - [`CredError::InvalidPrincipal`] for a NOBODY uid or gid (checked
    ///   before the backend is ever invoked)
    /// - [`CredError::IdentityLookup`] when enrichment fails
    /// - [`CredError::Signing`] when the backend cannot sign
    pub fn create(
        ctx: &CredContext,
        args: JobCredArgs,
        sign_it: bool,
        proto: ProtocolVersion,
    ) -> Result<Self, CredError> {
        Self::create_at(ctx, args, sign_it, proto, unix_now())
    }

    /// [`create`](Self::create) with an explicit creation time.
    ///
    /// # Errors
    ///
    /// As for [`create`](Self::create).
    pub fn create_at(
        ctx: &CredContext,
        args: JobCredArgs,
        sign_it: bool,
        proto: ProtocolVersion,
        now: u64,
    ) -> Result<Self, CredError> {
        Self::create_inner(ctx, args, sign_it, proto, now, false)
    }

    /// Test-support create: forces identity enrichment on and signs at
    /// the current protocol version.
    ///
    /// # Errors
    ///
    /// As for [`create`](Self::create).
    pub fn faker(ctx: &CredContext, args: JobCredArgs) -> Result<Self, CredError> {
        Self::create_inner(ctx, args, true, proto::PROTOCOL_VERSION, unix_now(), true)
    }

    fn create_inner(
        ctx: &CredContext,
        mut args: JobCredArgs,
        sign_it: bool,
        proto: ProtocolVersion,
        now: u64,
        force_gids: bool,
    ) -> Result<Self, CredError> {
        if !proto::is_supported(proto) {
            return Err(CredError::UnsupportedVersion(proto));
        }
        if args.uid == AUTH_NOBODY {
            tracing::error!(
                job_id = args.step_id.job_id,
                "refusing to create job credential for invalid user nobody"
            );
            return Err(CredError::InvalidPrincipal);
        }
        if args.gid == AUTH_NOBODY {
            tracing::error!(
                job_id = args.step_id.job_id,
                "refusing to create job credential for invalid group nobody"
            );
            return Err(CredError::InvalidPrincipal);
        }

        args.core_array_size =
            runlen::effective_len(&args.sock_core_rep_count, args.job_nhosts) as u32;

        if args.id.is_none() && (ctx.enable_nss() || ctx.send_gids() || force_gids) {
            let id = ctx
                .resolver()
                .fetch(args.uid, args.gid, ctx.enable_nss())
                .map_err(|e| {
                    tracing::error!(uid = args.uid, error = %e, "identity enrichment failed");
                    CredError::from(e)
                })?;
            args.id = Some(id);
        }

        let ctime = now;
        let mut image = PackBuf::with_capacity(4096);
        image.pack_u16(proto);
        pack_body(&args, ctime, proto, &mut image);

        let signature = if sign_it {
            ctx.signer().sign(image.as_slice())?
        } else {
            Vec::new()
        };
        image.pack_bytes(&signature);

        Ok(Self {
            inner: RwLock::new(CredInner {
                arg: args,
                ctime,
                verified: false,
                buffer: image.into_bytes(),
                buf_version: proto,
                signature,
            }),
        })
    }

    /// Rebuilds a credential from its wire image and verifies the
    /// signature; `verified` reflects the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::Decode`] for structurally invalid input and
    /// the version errors for an image this build cannot or was not asked
    /// to decode.
    pub fn unpack(
        ctx: &CredContext,
        image: &[u8],
        proto: ProtocolVersion,
    ) -> Result<Self, CredError> {
        let mut buf = UnpackBuf::new(image);
        Self::unpack_from(ctx, &mut buf, proto)
    }

    /// [`unpack`](Self::unpack) from a reader positioned inside a larger
    /// message; consumes exactly one credential image.
    ///
    /// # Errors
    ///
    /// As for [`unpack`](Self::unpack).
    pub fn unpack_from(
        ctx: &CredContext,
        buf: &mut UnpackBuf<'_>,
        proto: ProtocolVersion,
    ) -> Result<Self, CredError> {
        let start = buf.consumed();

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

        let (arg, ctime) = unpack_body(buf, version)?;
        let body_end = buf.consumed();
        let signature = buf.unpack_bytes()?;
        let image_end = buf.consumed();

        let mut verified = false;
        if !signature.is_empty() {
            match ctx.signer().verify(&buf.raw()[start..body_end], &signature) {
                Ok(()) => verified = true,
                Err(e) => {
                    tracing::warn!(job_id = arg.step_id.job_id, error = %e,
                        "job credential signature rejected");
                }
            }
        }

        Ok(Self {
            inner: RwLock::new(CredInner {
                arg,
                ctime,
                verified,
                buffer: Bytes::copy_from_slice(&buf.raw()[start..image_end]),
                buf_version: version,
                signature,
            }),
        })
    }

    /// Copies the cached wire image.
    ///
    /// Packing never re-runs the backend; any mutation after signing
    /// would not be reflected here, which is exactly the point — the
    /// cached image is what was signed.
    ///
    /// # Errors
    ///
    /// Returns [`CredError::ProtocolMismatch`] when `proto` differs from
    /// the version the credential was packed at.
    pub fn pack(&self, proto: ProtocolVersion) -> Result<Bytes, CredError> {
        let guard = self.inner.read().unwrap();
        debug_assert_eq!(guard.buf_version, proto, "pack at a foreign protocol version");
        if guard.buf_version != proto {
            return Err(CredError::ProtocolMismatch {
                requested: proto,
                cached: guard.buf_version,
            });
        }
        Ok(guard.buffer.clone())
    }

    /// Checks verification state and freshness, returning the argument
    /// bundle with the read lock held.
    ///
    /// # Errors
    ///
    /// - [`CredError::InvalidCredential`] when the signature was never
    ///   verified
    /// - [`CredError::CredentialExpired`] past the freshness window
    pub fn verify<'a>(&'a self, ctx: &CredContext) -> Result<CredArgsGuard<'a>, CredError> {
        self.verify_at(ctx, unix_now())
    }

    /// [`verify`](Self::verify) against an explicit clock.
    ///
    /// # Errors
    ///
    /// As for [`verify`](Self::verify).
    pub fn verify_at<'a>(
        &'a self,
        ctx: &CredContext,
        now: u64,
    ) -> Result<CredArgsGuard<'a>, CredError> {
        let guard = self.inner.read().unwrap();
        if !guard.verified {
            return Err(CredError::InvalidCredential);
        }
        if now > guard.ctime + ctx.expiration() {
            return Err(CredError::CredentialExpired);
        }
        Ok(CredArgsGuard { guard })
    }

    /// The argument bundle with the read lock held, without freshness
    /// checks.
    #[must_use]
    pub fn get_args(&self) -> CredArgsGuard<'_> {
        CredArgsGuard {
            guard: self.inner.read().unwrap(),
        }
    }

    /// Whether the signature has been verified.
    #[must_use]
    pub fn verified(&self) -> bool {
        self.inner.read().unwrap().verified
    }

    /// Creation time (unix seconds), set at sign time.
    #[must_use]
    pub fn ctime(&self) -> u64 {
        self.inner.read().unwrap().ctime
    }

    /// The detached signature; empty for an unsigned credential.
    #[must_use]
    pub fn signature(&self) -> Vec<u8> {
        self.inner.read().unwrap().signature.clone()
    }

    /// The enriched identity, if the credential carries one.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner.read().unwrap().arg.id.clone()
    }

    /// The job's generic-resource list.
    #[must_use]
    pub fn job_gres_list(&self) -> Option<Vec<Gres>> {
        self.inner.read().unwrap().arg.job_gres_list.clone()
    }

    /// The step's generic-resource list.
    #[must_use]
    pub fn step_gres_list(&self) -> Option<Vec<Gres>> {
        self.inner.read().unwrap().arg.step_gres_list.clone()
    }

    /// The job's node alias list.
    #[must_use]
    pub fn alias_list(&self) -> Option<String> {
        self.inner.read().unwrap().arg.job_alias_list.clone()
    }

    /// The job's resolved node addresses.
    #[must_use]
    pub fn node_addrs(&self) -> Vec<NodeAddr> {
        self.inner.read().unwrap().arg.job_node_addrs.clone()
    }

    /// Projects the allocation onto `node_name`: core range strings and
    /// memory limits for that node. Holds the read lock for the duration;
    /// the returned data is fully copied.
    ///
    /// # Errors
    ///
    /// See [`project::format_core_allocs`].
    pub fn format_core_allocs(
        &self,
        node_name: &str,
        cpus: u16,
    ) -> Result<NodeAlloc, CredError> {
        let guard = self.get_args();
        project::format_core_allocs(&guard, node_name, cpus)
    }

    /// Per-node job and step memory limits.
    #[must_use]
    pub fn mem_for_node(&self, node_name: &str) -> (u64, u64) {
        let guard = self.get_args();
        project::cred_get_mem(&guard, node_name)
    }

    /// Per-node job and step GRES lists.
    ///
    /// # Errors
    ///
    /// See [`project::cred_gres`].
    #[allow(clippy::type_complexity)]
    pub fn gres_for_node(
        &self,
        node_name: &str,
    ) -> Result<(Option<Vec<Gres>>, Option<Vec<Gres>>), CredError> {
        let guard = self.get_args();
        project::cred_gres(&guard, node_name)
    }
}

// ---------------------------------------------------------------------------
// Body codec
// ---------------------------------------------------------------------------

fn pack_identity(id: Option<&Identity>, buf: &mut PackBuf) {
    match id {
        None => buf.pack_bool(false),
        Some(id) => {
            buf.pack_bool(true);
            buf.pack_str(Some(&id.user_name));
            buf.pack_u32(id.primary_gid);
            buf.pack_u32_array(&id.gids);
            buf.pack_str(id.home.as_deref());
            buf.pack_str(id.shell.as_deref());
        }
    }
}

fn unpack_identity(buf: &mut UnpackBuf<'_>) -> Result<Option<Identity>, CredError> {
    if !buf.unpack_bool()? {
        return Ok(None);
    }
    let user_name = buf
        .unpack_str()?
        .ok_or(CredError::MissingField("identity user name"))?;
    let primary_gid = buf.unpack_u32()?;
    let gids = buf.unpack_u32_array()?;
    let home = buf.unpack_str()?;
    let shell = buf.unpack_str()?;
    Ok(Some(Identity {
        user_name,
        primary_gid,
        gids,
        home,
        shell,
    }))
}

fn pack_bitmap(bm: Option<&Bitmap>, buf: &mut PackBuf) {
    match bm {
        None => buf.pack_bool(false),
        Some(bm) => {
            buf.pack_bool(true);
            buf.pack_u32(bm.len());
            buf.pack_bytes(&bm.to_bytes());
        }
    }
}

fn unpack_bitmap(buf: &mut UnpackBuf<'_>) -> Result<Option<Bitmap>, CredError> {
    if !buf.unpack_bool()? {
        return Ok(None);
    }
    let nbits = buf.unpack_u32()?;
    let bytes = buf.unpack_bytes()?;
    Ok(Some(Bitmap::from_bytes(nbits, &bytes)?))
}

fn pack_gres_list(list: Option<&[Gres]>, buf: &mut PackBuf) {
    match list {
        None => buf.pack_bool(false),
        Some(list) => {
            buf.pack_bool(true);
            buf.pack_u32(list.len() as u32);
            for gres in list {
                buf.pack_str(Some(&gres.name));
                buf.pack_str(gres.type_name.as_deref());
                buf.pack_u64_array(&gres.node_count);
            }
        }
    }
}

fn unpack_gres_list(buf: &mut UnpackBuf<'_>) -> Result<Option<Vec<Gres>>, CredError> {
    if !buf.unpack_bool()? {
        return Ok(None);
    }
    let count = buf.unpack_u32()? as usize;
    if count > corral_core::wire::MAX_ARRAY_LEN {
        return Err(CredError::Decode(
            corral_core::wire::WireError::LengthOutOfBounds {
                len: count,
                max: corral_core::wire::MAX_ARRAY_LEN,
            },
        ));
    }
    let mut list = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let name = buf
            .unpack_str()?
            .ok_or(CredError::MissingField("gres name"))?;
        let type_name = buf.unpack_str()?;
        let node_count = buf.unpack_u64_array()?;
        list.push(Gres {
            name,
            type_name,
            node_count,
        });
    }
    Ok(Some(list))
}

/// Packs the signed portion of the credential: everything but the
/// trailing signature. Shape arrays are truncated to the effective
/// prefix; the rest of the arrays carry their own counts.
fn pack_body(arg: &JobCredArgs, ctime: u64, _proto: ProtocolVersion, buf: &mut PackBuf) {
    buf.pack_time(ctime);

    pack_identity(arg.id.as_ref(), buf);
    buf.pack_u32(arg.uid);
    buf.pack_u32(arg.gid);
    buf.pack_u32(arg.step_id.job_id);
    buf.pack_u32(arg.step_id.het_job_id);
    buf.pack_u32(arg.step_id.step_id);

    buf.pack_str(Some(&arg.job_hostlist));
    buf.pack_str(Some(&arg.step_hostlist));
    buf.pack_u32(arg.job_nhosts);

    let shapes = arg.core_array_size as usize;
    buf.pack_u16_array(&arg.sockets_per_node[..shapes.min(arg.sockets_per_node.len())]);
    buf.pack_u16_array(&arg.cores_per_socket[..shapes.min(arg.cores_per_socket.len())]);
    buf.pack_u32_array(&arg.sock_core_rep_count[..shapes.min(arg.sock_core_rep_count.len())]);

    pack_bitmap(arg.job_core_bitmap.as_ref(), buf);
    pack_bitmap(arg.step_core_bitmap.as_ref(), buf);

    buf.pack_u16_array(&arg.cpu_array);
    buf.pack_u32_array(&arg.cpu_array_reps);

    buf.pack_u64_array(&arg.job_mem_alloc);
    buf.pack_u32_array(&arg.job_mem_alloc_rep_count);
    buf.pack_u64_array(&arg.step_mem_alloc);
    buf.pack_u32_array(&arg.step_mem_alloc_rep_count);

    pack_gres_list(arg.job_gres_list.as_deref(), buf);
    pack_gres_list(arg.step_gres_list.as_deref(), buf);

    buf.pack_str(arg.job_account.as_deref());
    buf.pack_str(arg.job_alias_list.as_deref());
    buf.pack_str(arg.job_comment.as_deref());
    buf.pack_str(arg.job_constraints.as_deref());
    buf.pack_str(arg.job_licenses.as_deref());
    buf.pack_str(arg.job_partition.as_deref());
    buf.pack_str(arg.job_reservation.as_deref());
    buf.pack_str(arg.job_std_err.as_deref());
    buf.pack_str(arg.job_std_in.as_deref());
    buf.pack_str(arg.job_std_out.as_deref());

    buf.pack_u32(arg.job_node_addrs.len() as u32);
    for addr in &arg.job_node_addrs {
        buf.pack_str(Some(&addr.name));
        buf.pack_str(Some(&addr.host));
        buf.pack_u16(addr.port);
    }
}

fn unpack_body(
    buf: &mut UnpackBuf<'_>,
    _proto: ProtocolVersion,
) -> Result<(JobCredArgs, u64), CredError> {
    let ctime = buf.unpack_time()?;
    let mut arg = JobCredArgs::default();

    arg.id = unpack_identity(buf)?;
    arg.uid = buf.unpack_u32()?;
    arg.gid = buf.unpack_u32()?;
    arg.step_id.job_id = buf.unpack_u32()?;
    arg.step_id.het_job_id = buf.unpack_u32()?;
    arg.step_id.step_id = buf.unpack_u32()?;

    arg.job_hostlist = buf.unpack_str()?.unwrap_or_default();
    arg.step_hostlist = buf.unpack_str()?.unwrap_or_default();
    arg.job_nhosts = buf.unpack_u32()?;

    arg.sockets_per_node = buf.unpack_u16_array()?;
    arg.cores_per_socket = buf.unpack_u16_array()?;
    arg.sock_core_rep_count = buf.unpack_u32_array()?;
    arg.core_array_size = arg.sock_core_rep_count.len() as u32;

    arg.job_core_bitmap = unpack_bitmap(buf)?;
    arg.step_core_bitmap = unpack_bitmap(buf)?;

    arg.cpu_array = buf.unpack_u16_array()?;
    arg.cpu_array_reps = buf.unpack_u32_array()?;

    arg.job_mem_alloc = buf.unpack_u64_array()?;
    arg.job_mem_alloc_rep_count = buf.unpack_u32_array()?;
    arg.step_mem_alloc = buf.unpack_u64_array()?;
    arg.step_mem_alloc_rep_count = buf.unpack_u32_array()?;

    arg.job_gres_list = unpack_gres_list(buf)?;
    arg.step_gres_list = unpack_gres_list(buf)?;

    arg.job_account = buf.unpack_str()?;
    arg.job_alias_list = buf.unpack_str()?;
    arg.job_comment = buf.unpack_str()?;
    arg.job_constraints = buf.unpack_str()?;
    arg.job_licenses = buf.unpack_str()?;
    arg.job_partition = buf.unpack_str()?;
    arg.job_reservation = buf.unpack_str()?;
    arg.job_std_err = buf.unpack_str()?;
    arg.job_std_in = buf.unpack_str()?;
    arg.job_std_out = buf.unpack_str()?;

    let addr_count = buf.unpack_u32()? as usize;
    if addr_count > corral_core::wire::MAX_ARRAY_LEN {
        return Err(CredError::Decode(
            corral_core::wire::WireError::LengthOutOfBounds {
                len: addr_count,
                max: corral_core::wire::MAX_ARRAY_LEN,
            },
        ));
    }
    let mut addrs = Vec::with_capacity(addr_count.min(1024));
    for _ in 0..addr_count {
        let name = buf
            .unpack_str()?
            .ok_or(CredError::MissingField("node address name"))?;
        let host = buf
            .unpack_str()?
            .ok_or(CredError::MissingField("node address host"))?;
        let port = buf.unpack_u16()?;
        addrs.push(NodeAddr { name, host, port });
    }
    arg.job_node_addrs = addrs;

    Ok((arg, ctime))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use corral_core::identity::StaticResolver;

    use super::*;
    use crate::args::StepId;
    use crate::config::CredConfig;

    fn test_ctx() -> CredContext {
        let resolver = StaticResolver::new().with_user(
            1000,
            Identity {
                user_name: "alice".to_string(),
                primary_gid: 1000,
                gids: vec![1000, 2000],
                home: Some("/home/alice".to_string()),
                shell: Some("/bin/sh".to_string()),
            },
        );
        let config = CredConfig {
            signer: "null".to_string(),
            ..CredConfig::default()
        };
        CredContext::with_resolver(&config, Arc::new(resolver)).unwrap()
    }

    fn test_args() -> JobCredArgs {
        let mut bitmap = Bitmap::new(8);
        for bit in 0..4 {
            bitmap.set(bit).unwrap();
        }
        let mut args = JobCredArgs::new(1000, 1000, StepId::new(42, 0));
        args.job_hostlist = "n[1-2]".to_string();
        args.step_hostlist = "n[1-2]".to_string();
        args.job_nhosts = 2;
        args.sockets_per_node = vec![1];
        args.cores_per_socket = vec![4];
        args.sock_core_rep_count = vec![2];
        args.job_core_bitmap = Some(bitmap.clone());
        args.step_core_bitmap = Some(bitmap);
        args.job_mem_alloc = vec![1024];
        args.job_mem_alloc_rep_count = vec![2];
        args
    }

    #[test]
    fn test_create_rejects_nobody() {
        let ctx = test_ctx();
        let mut args = test_args();
        args.uid = AUTH_NOBODY;
        assert!(matches!(
            JobCredential::create(&ctx, args, true, proto::PROTOCOL_VERSION),
            Err(CredError::InvalidPrincipal)
        ));

        let mut args = test_args();
        args.gid = AUTH_NOBODY;
        assert!(matches!(
            JobCredential::create(&ctx, args, true, proto::PROTOCOL_VERSION),
            Err(CredError::InvalidPrincipal)
        ));
    }

    #[test]
    fn test_create_computes_core_array_size() {
        let ctx = test_ctx();
        let mut args = test_args();
        args.sockets_per_node = vec![1, 2, 9];
        args.cores_per_socket = vec![4, 4, 9];
        args.sock_core_rep_count = vec![1, 1, 9];
        let cred = JobCredential::create(&ctx, args, false, proto::PROTOCOL_VERSION).unwrap();
        assert_eq!(cred.get_args().core_array_size, 2);
    }

    #[test]
    fn test_create_enriches_identity() {
        let ctx = test_ctx();
        let cred =
            JobCredential::create(&ctx, test_args(), true, proto::PROTOCOL_VERSION).unwrap();
        let id = cred.identity().unwrap();
        assert_eq!(id.user_name, "alice");
        assert_eq!(id.gids, vec![1000, 2000]);
        // Basic (non-nss) enrichment carries no home/shell.
        assert_eq!(id.home, None);
    }

    #[test]
    fn test_round_trip_preserves_args_and_signature() {
        let ctx = test_ctx();
        let cred =
            JobCredential::create(&ctx, test_args(), true, proto::PROTOCOL_VERSION).unwrap();
        let image = cred.pack(proto::PROTOCOL_VERSION).unwrap();
        let back = JobCredential::unpack(&ctx, &image, proto::PROTOCOL_VERSION).unwrap();

        assert!(back.verified());
        assert_eq!(back.ctime(), cred.ctime());
        assert_eq!(back.signature(), cred.signature());
        assert_eq!(*back.get_args(), *cred.get_args());
    }

    #[test]
    fn test_pack_is_pure() {
        let ctx = test_ctx();
        let cred =
            JobCredential::create(&ctx, test_args(), true, proto::PROTOCOL_VERSION).unwrap();
        assert_eq!(
            cred.pack(proto::PROTOCOL_VERSION).unwrap(),
            cred.pack(proto::PROTOCOL_VERSION).unwrap()
        );
    }

    #[test]
    fn test_pack_rejects_version_mismatch() {
        let ctx = test_ctx();
        let cred =
            JobCredential::create(&ctx, test_args(), true, proto::PROTOCOL_VERSION).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cred.pack(proto::PROTOCOL_VERSION + 1)
        }));
        // Debug builds assert; release builds return the typed error.
        match result {
            Err(_) => {}
            Ok(r) => assert!(matches!(r, Err(CredError::ProtocolMismatch { .. }))),
        }
    }

    #[test]
    fn test_unsigned_credential_not_verified() {
        let ctx = test_ctx();
        let cred =
            JobCredential::create(&ctx, test_args(), false, proto::PROTOCOL_VERSION).unwrap();
        let image = cred.pack(proto::PROTOCOL_VERSION).unwrap();
        let back = JobCredential::unpack(&ctx, &image, proto::PROTOCOL_VERSION).unwrap();
        assert!(!back.verified());
        assert!(matches!(
            back.verify_at(&ctx, 0),
            Err(CredError::InvalidCredential)
        ));
    }

    #[test]
    fn test_tampered_image_not_verified() {
        let ctx = test_ctx();
        let cred =
            JobCredential::create(&ctx, test_args(), true, proto::PROTOCOL_VERSION).unwrap();
        let mut image = cred.pack(proto::PROTOCOL_VERSION).unwrap().to_vec();
        // Flip a ctime byte: structurally valid, signature no longer is.
        image[5] ^= 0x01;
        let back = JobCredential::unpack(&ctx, &image, proto::PROTOCOL_VERSION).unwrap();
        assert!(!back.verified());
    }

    #[test]
    fn test_truncated_image_is_decode_error() {
        let ctx = test_ctx();
        let cred =
            JobCredential::create(&ctx, test_args(), true, proto::PROTOCOL_VERSION).unwrap();
        let image = cred.pack(proto::PROTOCOL_VERSION).unwrap();
        let result = JobCredential::unpack(&ctx, &image[..image.len() / 2], proto::PROTOCOL_VERSION);
        assert!(matches!(result, Err(CredError::Decode(_))));
    }

    #[test]
    fn test_unpack_rejects_unknown_version() {
        let ctx = test_ctx();
        let mut image = PackBuf::new();
        image.pack_u16(0x0999);
        let bytes = image.into_bytes();
        assert!(matches!(
            JobCredential::unpack(&ctx, &bytes, proto::PROTOCOL_VERSION),
            Err(CredError::UnsupportedVersion(0x0999))
        ));
    }

    #[test]
    fn test_verify_freshness_window() {
        let ctx = test_ctx();
        let cred = JobCredential::create_at(
            &ctx,
            test_args(),
            true,
            proto::PROTOCOL_VERSION,
            1_000,
        )
        .unwrap();
        let image = cred.pack(proto::PROTOCOL_VERSION).unwrap();
        let back = JobCredential::unpack(&ctx, &image, proto::PROTOCOL_VERSION).unwrap();

        let window = ctx.expiration();
        assert!(back.verify_at(&ctx, 1_000 + window).is_ok());
        assert!(matches!(
            back.verify_at(&ctx, 1_000 + window + 1),
            Err(CredError::CredentialExpired)
        ));
    }

    #[test]
    fn test_concurrent_readers_share_lock() {
        let ctx = test_ctx();
        let cred =
            JobCredential::create(&ctx, test_args(), true, proto::PROTOCOL_VERSION).unwrap();

        let first = cred.get_args();
        let second = cred.get_args();
        assert_eq!(first.uid, second.uid);
    }
}
