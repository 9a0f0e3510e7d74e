//! Binary encoding of route points.
//!
//! Layout: 4-byte magic, little-endian `u32` format version, then one frame per
//! point. Each frame is a little-endian `u32` payload length followed by the
//! bincode-encoded [`RoutePoint`]. Frames are independent, so a corrupt point
//! is skipped without losing the points around it.

use crate::recording::types::RoutePoint;
use thiserror::Error;

/// Magic identifier
const MAGIC: [u8; 4] = *b"RTRK";

/// Format version
const FORMAT_VERSION: u32 = 1;

/// Frames larger than this cannot be a single point
const MAX_FRAME_LEN: usize = 256;

/// Encoding errors and header failures.
#[derive(Debug, Error, PartialEq)]
pub enum RouteCodecError {
    #[error("Invalid route data header")]
    InvalidMagic,

    #[error("Unsupported route format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Serialization error: {0}")]
    SerdeError(String),
}

/// Result of decoding a route blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRoute {
    /// Points that decoded and validated
    pub points: Vec<RoutePoint>,
    /// Frames that failed to decode or validate
    pub skipped: usize,
    /// Whether the blob ended in the middle of a frame
    pub truncated: bool,
}

/// Encode route points.
pub fn encode_route(points: &[RoutePoint]) -> Result<Vec<u8>, RouteCodecError> {
    let mut out = Vec::with_capacity(8 + points.len() * 40);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());

    for point in points {
        let payload =
            bincode::serialize(point).map_err(|e| RouteCodecError::SerdeError(e.to_string()))?;
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
    }

    Ok(out)
}

/// Decode route points, skipping damaged frames.
///
/// An empty blob decodes to an empty route. A bad header is an error since no
/// frame boundary can be trusted after it.
pub fn decode_route(bytes: &[u8]) -> Result<DecodedRoute, RouteCodecError> {
    let mut decoded = DecodedRoute::default();
    if bytes.is_empty() {
        return Ok(decoded);
    }
    if bytes.len() < 8 || bytes[0..4] != MAGIC {
        return Err(RouteCodecError::InvalidMagic);
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version > FORMAT_VERSION {
        return Err(RouteCodecError::UnsupportedVersion(version));
    }

    let mut cursor = 8;
    while cursor < bytes.len() {
        if bytes.len() - cursor < 4 {
            decoded.truncated = true;
            break;
        }
        let len = u32::from_le_bytes([
            bytes[cursor],
            bytes[cursor + 1],
            bytes[cursor + 2],
            bytes[cursor + 3],
        ]) as usize;
        cursor += 4;

        if len > MAX_FRAME_LEN || len > bytes.len() - cursor {
            // Frame boundary lost, nothing after this point can be trusted
            decoded.truncated = true;
            decoded.skipped += 1;
            break;
        }

        let payload = &bytes[cursor..cursor + len];
        cursor += len;

        match bincode::deserialize::<RoutePoint>(payload) {
            Ok(point) if point.is_valid() => decoded.points.push(point),
            Ok(_) | Err(_) => decoded.skipped += 1,
        }
    }

    if decoded.skipped > 0 {
        tracing::warn!(
            "Skipped {} corrupt route points ({} kept)",
            decoded.skipped,
            decoded.points.len()
        );
    }

    Ok(decoded)
}
