//! VXEdDSA signatures over X25519 keys.
//!
//! Lets a Montgomery (X25519) identity key sign its own signed pre-key without
//! keeping a separate Ed25519 key. A signature is `V || h || s` (96 bytes) and
//! every valid signature also yields a 32-byte VRF output that depends only on
//! the key and the message, never on the signing nonce.

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use sha2::{Digest, Sha512};

pub const SIGNATURE_LEN: usize = 96;
pub const VRF_OUTPUT_LEN: usize = 32;
pub const NONCE_LEN: usize = 64;

/// Little-endian encoding of p = 2^255 - 19.
const FIELD_PRIME: [u8; 32] = [
    0xED, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F,
];

/// Upper bound on try-and-increment rounds in `hash_to_point`. Roughly half of
/// all candidates land on the curve, so this is never reached in practice.
const MAX_HASH_TO_POINT_ROUNDS: u16 = 512;

/// `hash_i(X) = SHA-512((2^256 - 1 - i) || X)`.
fn hash_i(i: u8, parts: &[&[u8]]) -> [u8; 64] {
    let mut prefix = [0xFFu8; 32];
    prefix[0] = 0xFF - i;

    let mut hasher = Sha512::new();
    hasher.update(prefix);
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();

    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

fn clamp(mut k: [u8; 32]) -> [u8; 32] {
    k[0] &= 248;
    k[31] &= 127;
    k[31] |= 64;
    k
}

fn is_canonical_field_element(bytes: &[u8; 32]) -> bool {
    for (byte, prime) in bytes.iter().rev().zip(FIELD_PRIME.iter().rev()) {
        if byte != prime {
            return byte < prime;
        }
    }
    false
}

/// Edwards key pair with a zero sign bit, derived from a Montgomery secret.
fn calculate_key_pair(k: &[u8; 32]) -> ([u8; 32], Scalar) {
    let k_scalar = Scalar::from_bytes_mod_order(clamp(*k));
    let e = EdwardsPoint::mul_base(&k_scalar);
    let mut a_bytes = e.compress().to_bytes();
    let sign = a_bytes[31] >> 7;
    a_bytes[31] &= 0x7F;
    let a = if sign == 1 { -k_scalar } else { k_scalar };
    (a_bytes, a)
}

/// Hash `A || M` to a point of prime order with unknown discrete log.
///
/// Try-and-increment over Montgomery u-coordinates. Inputs are public so the
/// variable number of rounds leaks nothing.
fn hash_to_point(a_bytes: &[u8; 32], message: &[u8]) -> Option<EdwardsPoint> {
    for counter in 0..MAX_HASH_TO_POINT_ROUNDS {
        let h = hash_i(2, &[a_bytes, message, &counter.to_le_bytes()]);
        let mut u = [0u8; 32];
        u.copy_from_slice(&h[..32]);
        let sign = u[31] >> 7;
        u[31] &= 0x7F;
        if let Some(point) = MontgomeryPoint(u).to_edwards(sign) {
            let point = point.mul_by_cofactor();
            if !point.is_identity() {
                return Some(point);
            }
        }
    }
    None
}

/// Sign `message` with the X25519 secret `k` and a 64-byte random nonce `z`.
///
/// Returns the signature and its VRF output, or `None` if hashing to the
/// curve failed.
pub fn sign(
    k: &[u8; 32],
    message: &[u8],
    z: &[u8; NONCE_LEN],
) -> Option<([u8; SIGNATURE_LEN], [u8; VRF_OUTPUT_LEN])> {
    let (a_bytes, a) = calculate_key_pair(k);
    let bv = hash_to_point(&a_bytes, message)?;
    let v = bv * a;
    let v_bytes = v.compress().to_bytes();

    let r = Scalar::from_bytes_mod_order_wide(&hash_i(3, &[a.as_bytes(), &v_bytes, z]));
    let r_bytes = EdwardsPoint::mul_base(&r).compress().to_bytes();
    let rv_bytes = (bv * r).compress().to_bytes();

    let h = Scalar::from_bytes_mod_order_wide(&hash_i(
        4,
        &[&a_bytes, &v_bytes, &r_bytes, &rv_bytes, message],
    ));
    let s = r + h * a;

    let mut signature = [0u8; SIGNATURE_LEN];
    signature[..32].copy_from_slice(&v_bytes);
    signature[32..64].copy_from_slice(h.as_bytes());
    signature[64..].copy_from_slice(s.as_bytes());

    Some((signature, vrf_output(&v)))
}

/// Verify a signature against the X25519 public key `u`.
///
/// Returns the VRF output on success.
pub fn verify(
    u: &[u8; 32],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Option<[u8; VRF_OUTPUT_LEN]> {
    let mut v_bytes = [0u8; 32];
    let mut h_bytes = [0u8; 32];
    let mut s_bytes = [0u8; 32];
    v_bytes.copy_from_slice(&signature[..32]);
    h_bytes.copy_from_slice(&signature[32..64]);
    s_bytes.copy_from_slice(&signature[64..]);

    // h and s must be below 2^253.
    if !is_canonical_field_element(u) || h_bytes[31] & 0xE0 != 0 || s_bytes[31] & 0xE0 != 0 {
        return None;
    }

    let a_point = MontgomeryPoint(*u).to_edwards(0)?;
    let a_bytes = a_point.compress().to_bytes();

    let v = CompressedEdwardsY(v_bytes).decompress()?;
    if v.compress().to_bytes() != v_bytes {
        return None;
    }
    if a_point.mul_by_cofactor().is_identity() || v.mul_by_cofactor().is_identity() {
        return None;
    }

    let bv = hash_to_point(&a_bytes, message)?;
    let h = Scalar::from_bytes_mod_order(h_bytes);
    let s = Scalar::from_bytes_mod_order(s_bytes);

    let r = EdwardsPoint::mul_base(&s) - a_point * h;
    let rv = bv * s - v * h;

    let h_check = Scalar::from_bytes_mod_order_wide(&hash_i(
        4,
        &[
            &a_bytes,
            &v_bytes,
            &r.compress().to_bytes(),
            &rv.compress().to_bytes(),
            message,
        ],
    ));

    if h_check.to_bytes() == h_bytes {
        Some(vrf_output(&v))
    } else {
        None
    }
}

fn vrf_output(v: &EdwardsPoint) -> [u8; VRF_OUTPUT_LEN] {
    let digest = hash_i(5, &[&v.mul_by_cofactor().compress().to_bytes()]);
    let mut out = [0u8; VRF_OUTPUT_LEN];
    out.copy_from_slice(&digest[..VRF_OUTPUT_LEN]);
    out
}
