use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::PublicKey;
use serde::{de, Deserialize, Deserializer, Serializer};
use std::convert::TryInto;

fn decode_32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
    let s = String::deserialize(deserializer)?;
    let bytes = hex::decode(&s).map_err(de::Error::custom)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| de::Error::custom(format!("expected 32 bytes, found {}", bytes.len())))
}

pub(crate) fn point_from_bytes(bytes: [u8; 32]) -> Option<RistrettoPoint> {
    CompressedRistretto(bytes).decompress()
}

// a single-purpose type for use in `#[serde(with)]`
pub enum PointHex {}

impl PointHex {
    pub fn serialize<S: Serializer>(point: &RistrettoPoint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(point.compress().as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RistrettoPoint, D::Error> {
        let bytes = decode_32(deserializer)?;
        point_from_bytes(bytes).ok_or_else(|| de::Error::custom("invalid ristretto point"))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum OptionPointHex {}

impl OptionPointHex {
    pub fn serialize<S: Serializer>(
        point: &Option<RistrettoPoint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match point {
            Some(point) => serializer.serialize_some(&hex::encode(point.compress().as_bytes())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<RistrettoPoint>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            None => Ok(None),
            Some(s) => {
                let bytes = hex::decode(&s).map_err(de::Error::custom)?;
                let bytes: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| de::Error::custom("expected 32 bytes"))?;
                point_from_bytes(bytes)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom("invalid ristretto point"))
            }
        }
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum ScalarHex {}

impl ScalarHex {
    pub fn serialize<S: Serializer>(scalar: &Scalar, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(scalar.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Scalar, D::Error> {
        let bytes = decode_32(deserializer)?;
        Scalar::from_canonical_bytes(bytes).ok_or_else(|| de::Error::custom("non-canonical scalar"))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum EdPublicKeyHex {}

impl EdPublicKeyHex {
    pub fn serialize<S: Serializer>(public_key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(public_key.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PublicKey, D::Error> {
        let bytes = decode_32(deserializer)?;
        PublicKey::from_bytes(&bytes).map_err(de::Error::custom)
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum HashHex {}

impl HashHex {
    pub fn serialize<S: Serializer>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        decode_32(deserializer)
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum PointsHex {}

impl PointsHex {
    pub fn serialize<S: Serializer>(points: &[RistrettoPoint], serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(points.len()))?;
        for point in points {
            seq.serialize_element(&hex::encode(point.compress().as_bytes()))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<RistrettoPoint>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| {
                let bytes = hex::decode(s).map_err(de::Error::custom)?;
                let bytes: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| de::Error::custom("expected 32 bytes"))?;
                point_from_bytes(bytes).ok_or_else(|| de::Error::custom("invalid ristretto point"))
            })
            .collect()
    }
}
