//! Opaque network-address credentials.
//!
//! When a cluster runs with unresolvable node names, the controller hands
//! launching steps a signed, printable token carrying the resolved
//! addresses of the job's nodes. The token is opaque to everything but
//! this module: base64 over a length-prefixed body and detached
//! signature.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use corral_core::wire::{PackBuf, UnpackBuf};

use crate::args::NodeAddr;
use crate::ctx::CredContext;
use crate::error::CredError;
use crate::proto::{self, ProtocolVersion};

fn pack_addrs(addrs: &[NodeAddr], proto: ProtocolVersion, buf: &mut PackBuf) {
    buf.pack_u16(proto);
    buf.pack_u32(addrs.len() as u32);
    for addr in addrs {
        buf.pack_str(Some(&addr.name));
        buf.pack_str(Some(&addr.host));
        buf.pack_u16(addr.port);
    }
}

/// Creates a printable token over the job's node addresses.
///
/// # Errors
///
/// Returns [`CredError::Signing`] when the backend cannot sign.
pub fn create_net_cred(
    ctx: &CredContext,
    addrs: &[NodeAddr],
    proto: ProtocolVersion,
) -> Result<String, CredError> {
    if !proto::is_supported(proto) {
        return Err(CredError::UnsupportedVersion(proto));
    }

    let mut body = PackBuf::with_capacity(256);
    pack_addrs(addrs, proto, &mut body);
    let signature = ctx.signer().sign(body.as_slice())?;

    let mut image = PackBuf::with_capacity(body.len() + signature.len() + 8);
    image.pack_bytes(body.as_slice());
    image.pack_bytes(&signature);
    Ok(BASE64.encode(image.into_bytes()))
}

/// Verifies a token and recovers the node addresses.
///
/// # Errors
///
/// - [`CredError::InvalidToken`] for input that is not base64
/// - [`CredError::BadSignature`] when verification fails (terminal:
///   nothing is decoded from an unauthenticated body)
/// - [`CredError::Decode`] for a structurally invalid body
pub fn extract_net_cred(
    ctx: &CredContext,
    token: &str,
    proto: ProtocolVersion,
) -> Result<Vec<NodeAddr>, CredError> {
    let raw = BASE64
        .decode(token.trim())
        .map_err(|e| CredError::InvalidToken(e.to_string()))?;

    let mut outer = UnpackBuf::new(&raw);
    let body = outer.unpack_bytes()?;
    let signature = outer.unpack_bytes()?;
    outer.finish()?;

    ctx.signer().verify(&body, &signature)?;

    let mut buf = UnpackBuf::new(&body);
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

    let count = buf.unpack_u32()? as usize;
    if count > corral_core::wire::MAX_ARRAY_LEN {
        return Err(CredError::Decode(
            corral_core::wire::WireError::LengthOutOfBounds {
                len: count,
                max: corral_core::wire::MAX_ARRAY_LEN,
            },
        ));
    }
    let mut addrs = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name = buf
            .unpack_str()?
            .ok_or(CredError::MissingField("node address name"))?;
        let host = buf
            .unpack_str()?
            .ok_or(CredError::MissingField("node address host"))?;
        let port = buf.unpack_u16()?;
        addrs.push(NodeAddr { name, host, port });
    }
    buf.finish()?;

    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use corral_core::identity::StaticResolver;

    use super::*;
    use crate::config::CredConfig;

    fn test_ctx() -> CredContext {
        let config = CredConfig {
            signer: "null".to_string(),
            ..CredConfig::default()
        };
        CredContext::with_resolver(&config, Arc::new(StaticResolver::new())).unwrap()
    }

    fn test_addrs() -> Vec<NodeAddr> {
        vec![
            NodeAddr {
                name: "n1".to_string(),
                host: "10.0.0.1".to_string(),
                port: 6818,
            },
            NodeAddr {
                name: "n2".to_string(),
                host: "10.0.0.2".to_string(),
                port: 6818,
            },
        ]
    }

    #[test]
    fn test_round_trip() {
        let ctx = test_ctx();
        let token = create_net_cred(&ctx, &test_addrs(), proto::PROTOCOL_VERSION).unwrap();
        let addrs = extract_net_cred(&ctx, &token, proto::PROTOCOL_VERSION).unwrap();
        assert_eq!(addrs, test_addrs());
    }

    #[test]
    fn test_token_is_printable() {
        let ctx = test_ctx();
        let token = create_net_cred(&ctx, &test_addrs(), proto::PROTOCOL_VERSION).unwrap();
        assert!(token.is_ascii());
        assert!(!token.contains(char::is_whitespace));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let ctx = test_ctx();
        assert!(matches!(
            extract_net_cred(&ctx, "not base64!!", proto::PROTOCOL_VERSION),
            Err(CredError::InvalidToken(_))
        ));
        assert!(matches!(
            extract_net_cred(&ctx, "", proto::PROTOCOL_VERSION),
            Err(CredError::Decode(_))
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let ctx = test_ctx();
        let token = create_net_cred(&ctx, &test_addrs(), proto::PROTOCOL_VERSION).unwrap();
        let mut raw = BASE64.decode(token).unwrap();
        raw[8] ^= 0x01;
        let tampered = BASE64.encode(&raw);
        assert!(matches!(
            extract_net_cred(&ctx, &tampered, proto::PROTOCOL_VERSION),
            Err(CredError::BadSignature)
        ));
    }

    #[test]
    fn test_empty_addr_list_round_trips() {
        let ctx = test_ctx();
        let token = create_net_cred(&ctx, &[], proto::PROTOCOL_VERSION).unwrap();
        assert!(extract_net_cred(&ctx, &token, proto::PROTOCOL_VERSION)
            .unwrap()
            .is_empty());
    }
}
