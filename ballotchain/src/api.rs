//! Request and response payloads of the election service.

use crate::*;
use curve25519_dalek::ristretto::RistrettoPoint;
use ed25519_dalek::PublicKey;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u32,
}

/// Administrative request binding a frontend to this service
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Link {
    pub pin: String,
    pub roster: Roster,

    /// Frontend's signing key
    #[serde(with = "EdPublicKeyHex")]
    pub key: PublicKey,

    pub admins: Vec<User>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkReply {
    pub master: BlockHash,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Open {
    pub name: String,
    pub roster: Roster,
    pub admin: User,

    #[serde(default)]
    pub users: Vec<User>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenReply {
    #[serde(with = "PointHex")]
    pub key: RistrettoPoint,

    pub genesis: BlockHash,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Cast {
    pub election: String,
    pub token: String,
    pub ballot: Ciphertext,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastReply {
    pub index: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Close {
    pub election: String,
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Finalize {
    pub election: String,
    pub token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReply {
    pub tally: Tally,

    /// Unix seconds
    pub time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_from_json() {
        let mut rng = rand::rngs::OsRng {};
        let key = generate_point(&mut rng);
        let ballot = encrypt(&mut rng, &key, &encode_choice(2));
        let json = format!(
            r#"{{"election":"E1","token":"abc","ballot":{{"k":"{}","c":"{}"}}}}"#,
            hex::encode(ballot.k.compress().as_bytes()),
            hex::encode(ballot.c.compress().as_bytes())
        );

        let cast: Cast = serde_json::from_str(&json).unwrap();
        assert_eq!(cast.election, "E1");
        assert_eq!(cast.ballot, ballot);

        let open: Open =
            serde_json::from_str(r#"{"name":"E2","roster":{"list":[{"address":"local://0"}]},"admin":"root"}"#)
                .unwrap();
        assert!(open.users.is_empty());
        assert_eq!(open.admin, User::new("root"));
    }
}
