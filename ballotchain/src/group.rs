//! Facade over the Ristretto group.
//!
//! All point and scalar arithmetic is delegated to `curve25519-dalek`; this module only
//! composes it into the handful of operations the protocols call: sampling, Feldman
//! commitments, ElGamal encryption, partial decryption and Lagrange aggregation.

use crate::*;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_TABLE;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};

/// An ElGamal ciphertext pair `(K, C) = (r·G, r·X + M)`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ciphertext {
    #[serde(with = "PointHex")]
    pub k: RistrettoPoint,

    #[serde(with = "PointHex")]
    pub c: RistrettoPoint,
}

impl Ciphertext {
    /// Canonical byte form, used when hashing ledger blocks
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(self.k.compress().as_bytes());
        bytes[32..].copy_from_slice(self.c.compress().as_bytes());
        bytes
    }
}

pub fn generate_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    Scalar::random(rng)
}

pub fn generate_point<R: RngCore + CryptoRng>(rng: &mut R) -> RistrettoPoint {
    RistrettoPoint::random(rng)
}

/// `s·G`
pub fn base_mul(scalar: &Scalar) -> RistrettoPoint {
    &RISTRETTO_BASEPOINT_TABLE * scalar
}

/// Evaluation point of the node at `index`. Zero is reserved for the secret itself.
pub fn share_point(index: u32) -> Scalar {
    Scalar::from(index as u64 + 1)
}

/// Secret polynomial sampled by every DKG participant
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    /// Sample a polynomial of degree `threshold - 1`
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R, threshold: usize) -> Self {
        let coefficients = (0..threshold.max(1))
            .map(|_| generate_scalar(rng))
            .collect();
        Polynomial { coefficients }
    }

    pub fn evaluate(&self, index: u32) -> Scalar {
        let x = share_point(index);
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::zero(), |acc, coefficient| acc * x + coefficient)
    }

    pub fn commit(&self) -> Commitment {
        Commitment {
            points: self.coefficients.iter().map(base_mul).collect(),
        }
    }
}

/// Feldman commitment to a polynomial's coefficients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    #[serde(with = "PointsHex")]
    pub points: Vec<RistrettoPoint>,
}

impl Commitment {
    /// Commitment to the constant term, i.e. the dealer's contribution to the public key
    pub fn public(&self) -> RistrettoPoint {
        self.points
            .first()
            .copied()
            .unwrap_or_else(RistrettoPoint::identity)
    }

    pub fn degree(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    /// Check that `share` is the committed polynomial evaluated for `index`
    pub fn verify(&self, index: u32, share: &Scalar) -> bool {
        let x = share_point(index);
        let expected = self
            .points
            .iter()
            .rev()
            .fold(RistrettoPoint::identity(), |acc, point| acc * x + point);
        base_mul(share) == expected
    }
}

pub fn encrypt<R: RngCore + CryptoRng>(
    rng: &mut R,
    key: &RistrettoPoint,
    message: &RistrettoPoint,
) -> Ciphertext {
    let r = generate_scalar(rng);
    Ciphertext {
        k: base_mul(&r),
        c: key * r + message,
    }
}

/// Apply one secret share to a ciphertext
pub fn partial_decrypt(share: &Scalar, ciphertext: &Ciphertext) -> RistrettoPoint {
    ciphertext.k * share
}

/// Lagrange coefficient at zero for `index` over the evaluation points of `quorum`
pub fn lagrange_coefficient(index: u32, quorum: &[u32]) -> Scalar {
    let xi = share_point(index);
    let mut numerator = Scalar::one();
    let mut denominator = Scalar::one();
    for other in quorum.iter().filter(|other| **other != index) {
        let xj = share_point(*other);
        numerator *= xj;
        denominator *= xj - xi;
    }
    numerator * denominator.invert()
}

/// Remove the combined (already Lagrange-weighted) partial decryptions from `C`
pub fn aggregate(ciphertext: &Ciphertext, combined: &RistrettoPoint) -> RistrettoPoint {
    ciphertext.c - combined
}

/// Interpolate the shared secret from `(index, share)` pairs
pub fn recover_secret(shares: &[(u32, Scalar)]) -> Scalar {
    let quorum: Vec<u32> = shares.iter().map(|(index, _)| *index).collect();
    shares
        .iter()
        .map(|(index, share)| lagrange_coefficient(*index, &quorum) * share)
        .sum()
}

/// Embed a ballot choice as `m·G`
pub fn encode_choice(choice: u32) -> RistrettoPoint {
    base_mul(&Scalar::from(choice))
}

/// Recover a choice in `0..=max` from its embedding
pub fn decode_choice(point: &RistrettoPoint, max: u32) -> Option<u32> {
    let generator = base_mul(&Scalar::one());
    let mut candidate = RistrettoPoint::identity();
    for choice in 0..=max {
        if candidate == *point {
            return Some(choice);
        }
        candidate += generator;
    }
    None
}
