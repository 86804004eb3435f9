//! Wire protocol versioning.
//!
//! Every packed credential image leads with a two-byte version tag.
//! Decoders dispatch on the tag; encoders record the version they packed
//! at so later re-packs can refuse a mismatch.

/// Protocol version tag carried with every packed image.
pub type ProtocolVersion = u16;

/// First credential wire layout.
pub const PROTOCOL_V1: ProtocolVersion = 0x0100;

/// Oldest version this build still decodes.
pub const MIN_PROTOCOL_VERSION: ProtocolVersion = PROTOCOL_V1;

/// Version new credentials are packed at.
pub const PROTOCOL_VERSION: ProtocolVersion = PROTOCOL_V1;

/// Returns `true` when `version` is one this build can decode.
#[must_use]
pub const fn is_supported(version: ProtocolVersion) -> bool {
    version >= MIN_PROTOCOL_VERSION && version <= PROTOCOL_VERSION
}
