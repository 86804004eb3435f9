//! Error type for the credential subsystem.

use corral_core::bitmap::BitmapError;
use corral_core::hostlist::HostlistError;
use corral_core::identity::IdentityError;
use corral_core::wire::WireError;
use thiserror::Error;

/// Errors surfaced by credential operations.
///
/// Nothing is retried internally; every failure propagates to the caller
/// with its kind intact.
#[derive(Debug, Error)]
pub enum CredError {
    /// A create or extract path saw the NOBODY sentinel uid/gid.
    #[error("refusing credential for invalid user/group nobody")]
    InvalidPrincipal,

    /// The credential was never signature-verified.
    #[error("credential is not verified")]
    InvalidCredential,

    /// The freshness window has passed.
    #[error("credential has expired")]
    CredentialExpired,

    /// A multi-block broadcast extract found no anti-replay cache entry.
    #[error("broadcast credential signature not in replay cache")]
    ReplayRejected,

    /// No signing backend with the configured name.
    #[error("no signing backend named {0:?}")]
    BackendUnavailable(String),

    /// A pack was requested at a version other than the cached one.
    #[error("packed at protocol {cached:#06x}, requested {requested:#06x}")]
    ProtocolMismatch {
        /// Version the caller asked for.
        requested: u16,
        /// Version of the cached wire image.
        cached: u16,
    },

    /// A wire image tagged with a version this build does not speak.
    #[error("unsupported protocol version {0:#06x}")]
    UnsupportedVersion(u16),

    /// Structurally invalid packed credential.
    #[error("malformed credential: {0}")]
    Decode(#[from] WireError),

    /// A required credential field is absent.
    #[error("credential is missing {0}")]
    MissingField(&'static str),

    /// Identity enrichment failed during create.
    #[error("identity lookup failed: {0}")]
    IdentityLookup(#[from] IdentityError),

    /// The signing backend failed to produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The signature does not match the signed bytes.
    #[error("signature verification failed")]
    BadSignature,

    /// A printable token that is not valid base64.
    #[error("malformed credential token: {0}")]
    InvalidToken(String),

    /// A node name outside the credential's hostlist.
    #[error("node {node:?} not in credential hostlist")]
    UnknownNode {
        /// The node name that failed to resolve.
        node: String,
    },

    /// The credential's hostlist expression failed to parse.
    #[error(transparent)]
    Hostlist(#[from] HostlistError),

    /// A bitmap operation failed while slicing the allocation.
    #[error(transparent)]
    Bitmap(#[from] BitmapError),
}
