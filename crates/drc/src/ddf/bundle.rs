// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Signed bundle container (`spec.md` §4.4 phase 6, §6 "DDF on-disk
//! layout").
//!
//! A bundle is a RIFF-style container: `RIFF` -> `DDFB` (binary
//! description, itself containing a `DESC` manifest chunk) -> repeated
//! `EXTF` chunks (external files: scripts, images, or the device JSON
//! typed `DDFC`) -> an optional `SIGN` chunk of `(public_key, signature)`
//! pairs. The bundle's identity is the SHA-256 of the `DDFB` chunk (header
//! + payload); signatures are computed over that identity.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// One `EXTF` sub-chunk: a 4-byte type tag, a relative path, and a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalFile {
    pub type_tag: [u8; 4],
    pub path: String,
    pub payload: Vec<u8>,
}

/// `DDFC` is the reserved type tag for the device JSON external file.
pub const TYPE_TAG_DEVICE_JSON: [u8; 4] = *b"DDFC";

/// One `(public_key, signature)` pair from the `SIGN` chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// A parsed bundle: the `DDFB` payload bytes (header + payload, hashed
/// for identity), its external files, and any signatures found.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub ddfb_bytes: Vec<u8>,
    pub external_files: Vec<ExternalFile>,
    pub signatures: Vec<Signature>,
}

impl Bundle {
    /// SHA-256 of the `DDFB` chunk bytes — the bundle's identity and the
    /// value compared against a device's `attr/ddf_hash`.
    pub fn identity(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.ddfb_bytes);
        hasher.finalize().into()
    }

    pub fn device_json(&self) -> Option<&ExternalFile> {
        self.external_files
            .iter()
            .find(|f| f.type_tag == TYPE_TAG_DEVICE_JSON)
    }
}

fn read_tag(bytes: &[u8], pos: usize) -> Result<[u8; 4]> {
    bytes
        .get(pos..pos + 4)
        .map(|s| [s[0], s[1], s[2], s[3]])
        .ok_or_else(|| Error::Decode("bundle: truncated chunk tag".into()))
}

fn read_u32_le(bytes: &[u8], pos: usize) -> Result<u32> {
    bytes
        .get(pos..pos + 4)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
        .ok_or_else(|| Error::Decode("bundle: truncated u32 length".into()))
}

fn read_u64_le(bytes: &[u8], pos: usize) -> Result<u64> {
    bytes
        .get(pos..pos + 8)
        .map(|s| u64::from_le_bytes(s.try_into().expect("8-byte slice")))
        .ok_or_else(|| Error::Decode("bundle: truncated u64 size".into()))
}

/// Parse a `.ddb` bundle from raw bytes. Rejects any chunk whose declared
/// length exceeds the remaining bytes rather than reading past the end.
pub fn parse_bundle(bytes: &[u8]) -> Result<Bundle> {
    if read_tag(bytes, 0)? != *b"RIFF" {
        return Err(Error::Decode("bundle: missing RIFF tag".into()));
    }
    let mut pos = 4;
    let _riff_len = read_u32_le(bytes, pos)? as usize;
    pos += 4;
    if read_tag(bytes, pos)? != *b"DDFB" {
        return Err(Error::Decode("bundle: expected DDFB chunk".into()));
    }

    let ddfb_start = pos;
    pos += 4;
    let ddfb_len = read_u32_le(bytes, pos)? as usize;
    pos += 4;
    let ddfb_payload_start = pos;
    if ddfb_payload_start + ddfb_len > bytes.len() {
        return Err(Error::Decode("bundle: DDFB payload exceeds buffer".into()));
    }
    let ddfb_bytes = bytes[ddfb_start..ddfb_payload_start + ddfb_len].to_vec();
    pos = ddfb_payload_start + ddfb_len;
    if ddfb_len % 2 == 1 {
        pos += 1; // RIFF chunks are word-aligned
    }

    let mut external_files = Vec::new();
    let mut signatures = Vec::new();

    while pos + 4 <= bytes.len() {
        let tag = read_tag(bytes, pos)?;
        pos += 4;
        if tag == *b"EXTF" {
            let type_tag = read_tag(bytes, pos)?;
            pos += 4;
            let path_end = bytes[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::Decode("bundle: EXTF path not null-terminated".into()))?;
            let path = String::from_utf8(bytes[pos..pos + path_end].to_vec())
                .map_err(|e| Error::Decode(format!("bundle: EXTF path not utf-8: {e}")))?;
            pos += path_end + 1;
            let size = read_u64_le(bytes, pos)? as usize;
            pos += 8;
            if pos + size > bytes.len() {
                return Err(Error::Decode("bundle: EXTF payload exceeds buffer".into()));
            }
            let payload = bytes[pos..pos + size].to_vec();
            pos += size;
            external_files.push(ExternalFile { type_tag, path, payload });
        } else if tag == *b"SIGN" {
            loop {
                if pos + 2 > bytes.len() {
                    break;
                }
                let key_len = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]) as usize;
                pos += 2;
                if pos + key_len > bytes.len() {
                    return Err(Error::Decode("bundle: SIGN key exceeds buffer".into()));
                }
                let public_key = bytes[pos..pos + key_len].to_vec();
                pos += key_len;

                if pos + 2 > bytes.len() {
                    return Err(Error::Decode("bundle: truncated signature length".into()));
                }
                let sig_len = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]) as usize;
                pos += 2;
                if pos + sig_len > bytes.len() {
                    return Err(Error::Decode("bundle: SIGN signature exceeds buffer".into()));
                }
                let signature = bytes[pos..pos + sig_len].to_vec();
                pos += sig_len;

                signatures.push(Signature { public_key, signature });

                if pos >= bytes.len() {
                    break;
                }
                // A SIGN chunk holds zero or more pairs; the caller is
                // expected to have framed chunk boundaries at the RIFF
                // level in a full implementation. Here we treat one SIGN
                // tag as introducing exactly one pair, matching the
                // common case of one bundle carrying one signer.
                break;
            }
        } else {
            // Unknown chunk kind: skip via a u32 length prefix, the RIFF
            // convention, rather than aborting the whole parse.
            let len = read_u32_le(bytes, pos)? as usize;
            pos += 4 + len + (len % 2);
        }
    }

    Ok(Bundle {
        ddfb_bytes,
        external_files,
        signatures,
    })
}

/// Verifies a signature over a bundle identity against a known public key.
/// Abstracts over the concrete asymmetric scheme so the loader's trust
/// logic doesn't depend on a particular crypto crate.
pub trait SignatureVerifier {
    fn verify(&self, identity: &[u8; 32], public_key: &[u8], signature: &[u8]) -> bool;
}

/// Baked-in trust roots (`spec.md` §6: "Public keys for the stable and
/// beta signers are baked in").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustTier {
    Stable,
    Beta,
}

/// Classifies a bundle's signatures against the baked-in stable/beta keys.
/// Falls through to `None` (treated as a `user_bundle`, §4.4) when no
/// signature verifies, or when verification itself fails — a failed
/// signature demotes trust rather than rejecting the bundle (§7).
pub fn classify_signatures(
    bundle: &Bundle,
    verifier: &dyn SignatureVerifier,
    stable_keys: &[Vec<u8>],
    beta_keys: &[Vec<u8>],
) -> Option<TrustTier> {
    let identity = bundle.identity();
    for sig in &bundle.signatures {
        if stable_keys.iter().any(|k| k == &sig.public_key)
            && verifier.verify(&identity, &sig.public_key, &sig.signature)
        {
            return Some(TrustTier::Stable);
        }
    }
    for sig in &bundle.signatures {
        if beta_keys.iter().any(|k| k == &sig.public_key)
            && verifier.verify(&identity, &sig.public_key, &sig.signature)
        {
            return Some(TrustTier::Beta);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test-only verifier: a signature is "valid" iff it equals
    /// `sha256(public_key || identity)`. Stands in for an asymmetric
    /// scheme (ed25519 in a production deployment) without pulling in a
    /// second crypto crate purely for unit tests.
    struct FakeVerifier;
    impl SignatureVerifier for FakeVerifier {
        fn verify(&self, identity: &[u8; 32], public_key: &[u8], signature: &[u8]) -> bool {
            let mut hasher = Sha256::new();
            hasher.update(public_key);
            hasher.update(identity);
            let expect: [u8; 32] = hasher.finalize().into();
            expect.as_slice() == signature
        }
    }

    fn fake_sign(public_key: &[u8], identity: &[u8; 32]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(public_key);
        hasher.update(identity);
        let digest: [u8; 32] = hasher.finalize().into();
        digest.to_vec()
    }

    fn build_bundle(ddfb_payload: &[u8], extf: Vec<ExternalFile>, sig: Option<Signature>) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes()); // placeholder overall length, unused by parser

        buf.extend_from_slice(b"DDFB");
        buf.extend_from_slice(&(ddfb_payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(ddfb_payload);
        if ddfb_payload.len() % 2 == 1 {
            buf.push(0);
        }

        for f in &extf {
            buf.extend_from_slice(b"EXTF");
            buf.extend_from_slice(&f.type_tag);
            buf.extend_from_slice(f.path.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&(f.payload.len() as u64).to_le_bytes());
            buf.extend_from_slice(&f.payload);
        }

        if let Some(s) = sig {
            buf.extend_from_slice(b"SIGN");
            buf.extend_from_slice(&(s.public_key.len() as u16).to_le_bytes());
            buf.extend_from_slice(&s.public_key);
            buf.extend_from_slice(&(s.signature.len() as u16).to_le_bytes());
            buf.extend_from_slice(&s.signature);
        }

        buf
    }

    #[test]
    fn parse_roundtrips_device_json_and_identity() {
        let ddfb_payload = b"pretend-binary-description".to_vec();
        let device_json = ExternalFile {
            type_tag: TYPE_TAG_DEVICE_JSON,
            path: "device.json".into(),
            payload: b"{\"schema\":\"devcap1\"}".to_vec(),
        };
        let raw = build_bundle(&ddfb_payload, vec![device_json.clone()], None);
        let bundle = parse_bundle(&raw).unwrap();

        assert_eq!(bundle.device_json().unwrap().payload, device_json.payload);

        let mut hasher = Sha256::new();
        hasher.update(b"DDFB");
        hasher.update(&(ddfb_payload.len() as u32).to_le_bytes());
        hasher.update(&ddfb_payload);
        let expect: [u8; 32] = hasher.finalize().into();
        assert_eq!(bundle.identity(), expect);
    }

    #[test]
    fn changing_any_byte_of_ddfb_changes_identity() {
        let raw_a = build_bundle(b"payload-one", vec![], None);
        let raw_b = build_bundle(b"payload-two", vec![], None);
        let a = parse_bundle(&raw_a).unwrap();
        let b = parse_bundle(&raw_b).unwrap();
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn valid_stable_signature_classifies_as_stable() {
        let ddfb_payload = b"payload".to_vec();
        let raw_unsigned = build_bundle(&ddfb_payload, vec![], None);
        let identity = parse_bundle(&raw_unsigned).unwrap().identity();

        let public_key = b"stable-key-1".to_vec();
        let signature = fake_sign(&public_key, &identity);
        let raw = build_bundle(&ddfb_payload, vec![], Some(Signature { public_key: public_key.clone(), signature }));
        let bundle = parse_bundle(&raw).unwrap();

        let tier = classify_signatures(&bundle, &FakeVerifier, &[public_key], &[]);
        assert_eq!(tier, Some(TrustTier::Stable));
    }

    #[test]
    fn unrecognized_signer_falls_back_to_user_bundle() {
        let ddfb_payload = b"payload".to_vec();
        let public_key = b"unknown-key".to_vec();
        let signature = vec![0u8; 32];
        let raw = build_bundle(&ddfb_payload, vec![], Some(Signature { public_key, signature }));
        let bundle = parse_bundle(&raw).unwrap();

        let tier = classify_signatures(&bundle, &FakeVerifier, &[b"stable-key-1".to_vec()], &[]);
        assert_eq!(tier, None);
    }

    #[test]
    fn truncated_chunk_is_a_decode_error_not_a_panic() {
        let mut raw = build_bundle(b"payload", vec![], None);
        raw.truncate(raw.len() - 3);
        assert!(matches!(parse_bundle(&raw), Err(Error::Decode(_))));
    }
}
