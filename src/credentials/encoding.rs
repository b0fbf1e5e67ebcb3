//! Legacy U2F registration blobs and public-key re-encoding.
//!
//! A legacy blob is the raw U2F registration message:
//!
//! ```text
//! 0x05 | 65-byte uncompressed P-256 point | L | key handle (L bytes)
//!      | DER attestation certificate | signature
//! ```
//!
//! The certificate length is read from its DER header; everything after it is
//! the signature. Blobs that stop right after the key handle are accepted and
//! carry no certificate.

use ciborium::value::{Integer, Value};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

const U2F_RESERVED_BYTE: u8 = 0x05;
const UNCOMPRESSED_TAG: u8 = 0x04;
const DER_SEQUENCE: u8 = 0x30;
pub const COORDINATE_LEN: usize = 32;
pub const UNCOMPRESSED_POINT_LEN: usize = 1 + 2 * COORDINATE_LEN;

// COSE_Key labels and values (RFC 8152 section 13)
const COSE_KTY: i64 = 1;
const COSE_ALG: i64 = 3;
const COSE_CRV: i64 = -1;
const COSE_X: i64 = -2;
const COSE_Y: i64 = -3;
const COSE_KTY_EC2: i64 = 2;
const COSE_ALG_ES256: i64 = -7;
const COSE_CRV_P256: i64 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LegacyDecodeError {
    #[error("registration blob is empty")]
    Empty,
    #[error("unexpected reserved byte {0:#04x}")]
    ReservedByte(u8),
    #[error("registration blob truncated while reading {0}")]
    Truncated(&'static str),
    #[error("public key is not an uncompressed curve point")]
    PointFormat,
    #[error("key handle is empty")]
    EmptyKeyHandle,
    #[error("attestation certificate is not a DER sequence")]
    CertificateTag,
    #[error("attestation certificate has a malformed length")]
    CertificateLength,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("cbor encoding failed: {0}")]
    Cbor(String),
    #[error("public key is neither an uncompressed point nor a COSE EC2 key")]
    UnknownFormat,
    #[error("COSE key is missing or has an invalid {0}")]
    CoseField(&'static str),
}

/// Affine P-256 point with fixed-width big-endian coordinates.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EcPoint {
    pub x: [u8; COORDINATE_LEN],
    pub y: [u8; COORDINATE_LEN],
}

impl EcPoint {
    /// Parses `0x04 || X || Y`. No on-curve check is performed.
    ///
    /// # Errors
    /// Returns an error if the length or leading tag is wrong.
    pub fn from_uncompressed(bytes: &[u8]) -> Result<Self, LegacyDecodeError> {
        if bytes.len() != UNCOMPRESSED_POINT_LEN || bytes[0] != UNCOMPRESSED_TAG {
            return Err(LegacyDecodeError::PointFormat);
        }
        let mut x = [0u8; COORDINATE_LEN];
        let mut y = [0u8; COORDINATE_LEN];
        x.copy_from_slice(&bytes[1..=COORDINATE_LEN]);
        y.copy_from_slice(&bytes[1 + COORDINATE_LEN..]);
        Ok(Self { x, y })
    }

    #[must_use]
    pub fn uncompressed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(UNCOMPRESSED_POINT_LEN);
        out.push(UNCOMPRESSED_TAG);
        out.extend_from_slice(&self.x);
        out.extend_from_slice(&self.y);
        out
    }
}

impl fmt::Debug for EcPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcPoint")
            .field("x0", &self.x[0])
            .field("y0", &self.y[0])
            .finish_non_exhaustive()
    }
}

/// Structured view of a legacy blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRegistration {
    pub key_handle: Vec<u8>,
    pub point: EcPoint,
    pub attestation_cert: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], LegacyDecodeError> {
        if self.buf.len() < n {
            return Err(LegacyDecodeError::Truncated(what));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn byte(&mut self, what: &'static str) -> Result<u8, LegacyDecodeError> {
        Ok(self.take(1, what)?[0])
    }
}

/// Total size (header included) of the DER element at the start of `buf`.
fn der_element_len(buf: &[u8]) -> Result<usize, LegacyDecodeError> {
    if buf.first() != Some(&DER_SEQUENCE) {
        return Err(LegacyDecodeError::CertificateTag);
    }
    let first = *buf
        .get(1)
        .ok_or(LegacyDecodeError::Truncated("certificate length"))?;
    let (header, body) = match first {
        0x00..=0x7f => (2, usize::from(first)),
        0x81..=0x84 => {
            let count = usize::from(first & 0x7f);
            let bytes = buf
                .get(2..2 + count)
                .ok_or(LegacyDecodeError::Truncated("certificate length"))?;
            let body = bytes
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            (2 + count, body)
        }
        // indefinite or oversized lengths are not valid DER
        _ => return Err(LegacyDecodeError::CertificateLength),
    };
    header
        .checked_add(body)
        .ok_or(LegacyDecodeError::CertificateLength)
}

impl LegacyRegistration {
    /// # Errors
    /// Returns an error describing the first structural problem in `raw`.
    pub fn decode(raw: &[u8]) -> Result<Self, LegacyDecodeError> {
        let mut reader = Reader { buf: raw };
        let reserved = reader
            .byte("reserved byte")
            .map_err(|_| LegacyDecodeError::Empty)?;
        if reserved != U2F_RESERVED_BYTE {
            return Err(LegacyDecodeError::ReservedByte(reserved));
        }

        let point =
            EcPoint::from_uncompressed(reader.take(UNCOMPRESSED_POINT_LEN, "public key")?)?;

        let handle_len = usize::from(reader.byte("key handle length")?);
        if handle_len == 0 {
            return Err(LegacyDecodeError::EmptyKeyHandle);
        }
        let key_handle = reader.take(handle_len, "key handle")?.to_vec();

        let (attestation_cert, signature) = if reader.buf.is_empty() {
            (None, Vec::new())
        } else {
            let cert_len = der_element_len(reader.buf)?;
            let cert = reader.take(cert_len, "attestation certificate")?.to_vec();
            (Some(cert), reader.buf.to_vec())
        };

        Ok(Self {
            key_handle,
            point,
            attestation_cert,
            signature,
        })
    }
}

/// Target representation for migrated public keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicKeyEncoding {
    /// COSE_Key map carrying key type, algorithm and curve.
    #[default]
    Cose,
    /// Bare `0x04 || X || Y`.
    Uncompressed,
}

impl PublicKeyEncoding {
    /// # Errors
    /// Returns an error if CBOR serialization fails.
    pub fn encode(self, point: &EcPoint) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::Uncompressed => Ok(point.uncompressed()),
            Self::Cose => cose_ec2(point),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cose => "cose",
            Self::Uncompressed => "uncompressed",
        }
    }
}

impl FromStr for PublicKeyEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cose" => Ok(Self::Cose),
            "uncompressed" => Ok(Self::Uncompressed),
            other => Err(format!("unknown key encoding: {other}")),
        }
    }
}

fn int(v: i64) -> Value {
    Value::Integer(Integer::from(v))
}

fn cose_ec2(point: &EcPoint) -> Result<Vec<u8>, EncodingError> {
    let key = Value::Map(vec![
        (int(COSE_KTY), int(COSE_KTY_EC2)),
        (int(COSE_ALG), int(COSE_ALG_ES256)),
        (int(COSE_CRV), int(COSE_CRV_P256)),
        (int(COSE_X), Value::Bytes(point.x.to_vec())),
        (int(COSE_Y), Value::Bytes(point.y.to_vec())),
    ]);
    let mut out = Vec::new();
    ciborium::ser::into_writer(&key, &mut out).map_err(|e| EncodingError::Cbor(e.to_string()))?;
    Ok(out)
}

fn cose_coordinate(
    map: &[(Value, Value)],
    label: i64,
    name: &'static str,
) -> Result<[u8; COORDINATE_LEN], EncodingError> {
    map.iter()
        .find(|(k, _)| k.as_integer() == Some(Integer::from(label)))
        .and_then(|(_, v)| v.as_bytes())
        .and_then(|b| <[u8; COORDINATE_LEN]>::try_from(b.as_slice()).ok())
        .ok_or(EncodingError::CoseField(name))
}

/// Reads a stored public key in either supported encoding back into a point.
///
/// # Errors
/// Returns an error if the bytes are not a P-256 key in a known encoding.
pub fn decode_public_key(bytes: &[u8]) -> Result<EcPoint, EncodingError> {
    if bytes.len() == UNCOMPRESSED_POINT_LEN && bytes[0] == UNCOMPRESSED_TAG {
        return EcPoint::from_uncompressed(bytes).map_err(|_| EncodingError::UnknownFormat);
    }
    let value: Value =
        ciborium::de::from_reader(bytes).map_err(|_| EncodingError::UnknownFormat)?;
    let map = value.as_map().ok_or(EncodingError::UnknownFormat)?;
    let field = |label: i64| {
        map.iter()
            .find(|(k, _)| k.as_integer() == Some(Integer::from(label)))
            .and_then(|(_, v)| v.as_integer())
    };
    if field(COSE_KTY) != Some(Integer::from(COSE_KTY_EC2)) {
        return Err(EncodingError::CoseField("kty"));
    }
    if field(COSE_CRV) != Some(Integer::from(COSE_CRV_P256)) {
        return Err(EncodingError::CoseField("crv"));
    }
    Ok(EcPoint {
        x: cose_coordinate(map, COSE_X, "x")?,
        y: cose_coordinate(map, COSE_Y, "y")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a well-formed blob; `seed` varies the point and key handle.
    pub(crate) fn legacy_blob(seed: u8, with_cert: bool) -> Vec<u8> {
        let mut blob = vec![U2F_RESERVED_BYTE, UNCOMPRESSED_TAG];
        blob.extend_from_slice(&[seed; COORDINATE_LEN]);
        blob.extend_from_slice(&[seed.wrapping_add(1); COORDINATE_LEN]);
        blob.push(4);
        blob.extend_from_slice(&[0xa0 ^ seed; 4]);
        if with_cert {
            // SEQUENCE with a 0x81 long-form length of 130
            blob.extend_from_slice(&[DER_SEQUENCE, 0x81, 130]);
            blob.extend_from_slice(&[0x11; 130]);
            blob.extend_from_slice(&[0x30, 0x45, 0x02, 0x20]);
        }
        blob
    }

    #[test]
    fn decodes_blob_with_certificate() -> Result<(), LegacyDecodeError> {
        let reg = LegacyRegistration::decode(&legacy_blob(7, true))?;
        assert_eq!(reg.point.x, [7; COORDINATE_LEN]);
        assert_eq!(reg.point.y, [8; COORDINATE_LEN]);
        assert_eq!(reg.key_handle.len(), 4);
        assert_eq!(reg.attestation_cert.as_ref().map(Vec::len), Some(133));
        assert_eq!(reg.signature, vec![0x30, 0x45, 0x02, 0x20]);
        Ok(())
    }

    #[test]
    fn certificate_is_optional() {
        let reg = LegacyRegistration::decode(&legacy_blob(1, false));
        assert!(
            matches!(reg, Ok(r) if r.attestation_cert.is_none() && r.signature.is_empty())
        );
    }

    #[test]
    fn rejects_malformed_blobs() {
        assert_eq!(
            LegacyRegistration::decode(&[]),
            Err(LegacyDecodeError::Empty)
        );
        assert_eq!(
            LegacyRegistration::decode(&[0x04]),
            Err(LegacyDecodeError::ReservedByte(0x04))
        );

        let raw = legacy_blob(3, true);
        assert_eq!(
            LegacyRegistration::decode(&raw[..40]),
            Err(LegacyDecodeError::Truncated("public key"))
        );
        assert_eq!(
            LegacyRegistration::decode(&raw[..68]),
            Err(LegacyDecodeError::Truncated("key handle"))
        );

        let mut bad_point = raw.clone();
        bad_point[1] = 0x02;
        assert_eq!(
            LegacyRegistration::decode(&bad_point),
            Err(LegacyDecodeError::PointFormat)
        );

        let mut bad_cert = legacy_blob(3, false);
        bad_cert.extend_from_slice(&[0x31, 0x02, 0x00, 0x00]);
        assert_eq!(
            LegacyRegistration::decode(&bad_cert),
            Err(LegacyDecodeError::CertificateTag)
        );

        let mut short_cert = legacy_blob(3, false);
        short_cert.extend_from_slice(&[DER_SEQUENCE, 0x10, 0x00]);
        assert_eq!(
            LegacyRegistration::decode(&short_cert),
            Err(LegacyDecodeError::Truncated("attestation certificate"))
        );

        let mut indefinite = legacy_blob(3, false);
        indefinite.extend_from_slice(&[DER_SEQUENCE, 0x80, 0x00]);
        assert_eq!(
            LegacyRegistration::decode(&indefinite),
            Err(LegacyDecodeError::CertificateLength)
        );
    }

    #[test]
    fn uncompressed_encoding_keeps_leading_zeros() -> Result<(), EncodingError> {
        let mut point = EcPoint {
            x: [0xaa; COORDINATE_LEN],
            y: [0xbb; COORDINATE_LEN],
        };
        point.x[0] = 0;
        let encoded = PublicKeyEncoding::Uncompressed.encode(&point)?;
        assert_eq!(encoded.len(), UNCOMPRESSED_POINT_LEN);
        assert_eq!(encoded[0], UNCOMPRESSED_TAG);
        assert_eq!(encoded[1], 0);
        assert_eq!(decode_public_key(&encoded)?, point);
        Ok(())
    }

    #[test]
    fn cose_encoding_describes_es256() -> Result<(), EncodingError> {
        let point = EcPoint {
            x: [0x01; COORDINATE_LEN],
            y: [0x02; COORDINATE_LEN],
        };
        let encoded = PublicKeyEncoding::Cose.encode(&point)?;
        // map(5), 1: 2, 3: -7, -1: 1, -2: bytes(32)
        assert_eq!(
            &encoded[..9],
            &[0xa5, 0x01, 0x02, 0x03, 0x26, 0x20, 0x01, 0x21, 0x58]
        );
        assert_eq!(decode_public_key(&encoded)?, point);
        Ok(())
    }

    #[test]
    fn rejects_unknown_public_key_bytes() {
        assert_eq!(
            decode_public_key(&[0xff, 0x00]),
            Err(EncodingError::UnknownFormat)
        );
    }

    #[test]
    fn parses_encoding_names() {
        assert_eq!("COSE".parse(), Ok(PublicKeyEncoding::Cose));
        assert_eq!("uncompressed".parse(), Ok(PublicKeyEncoding::Uncompressed));
        assert!("pem".parse::<PublicKeyEncoding>().is_err());
        assert_eq!(PublicKeyEncoding::default(), PublicKeyEncoding::Cose);
    }
}
