//! Append-only, hash-linked ballot chains, one per election.

use crate::*;
use ed25519_dalek::PublicKey;
use log::debug;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(#[serde(with = "HashHex")] pub [u8; 32]);

/// Previous-hash of every genesis block
pub const ZERO_HASH: BlockHash = BlockHash([0u8; 32]);

impl BlockHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

fn finish(hasher: Sha256) -> BlockHash {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    BlockHash(hash)
}

fn hash_id(hasher: &mut Sha256, election_id: &str) {
    hasher.update(&(election_id.len() as u64).to_be_bytes());
    hasher.update(election_id.as_bytes());
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GenesisBlock {
    pub election_id: String,
    pub nonce: Uuid,
    pub previous: BlockHash,
    pub hash: BlockHash,
}

impl GenesisBlock {
    pub fn new(election_id: &str) -> Self {
        let nonce = Uuid::new_v4();
        GenesisBlock {
            election_id: election_id.to_string(),
            nonce,
            previous: ZERO_HASH,
            hash: Self::compute_hash(election_id, &nonce),
        }
    }

    pub fn compute_hash(election_id: &str, nonce: &Uuid) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(b"genesis");
        hash_id(&mut hasher, election_id);
        hasher.update(nonce.as_bytes());
        hasher.update(&ZERO_HASH.0);
        finish(hasher)
    }

    pub fn is_intact(&self) -> bool {
        self.previous == ZERO_HASH && self.hash == Self::compute_hash(&self.election_id, &self.nonce)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BallotBlock {
    pub election_id: String,
    pub index: u64,
    pub previous: BlockHash,
    pub ballot: Ciphertext,
    pub hash: BlockHash,
}

impl BallotBlock {
    fn new(election_id: &str, index: u64, previous: BlockHash, ballot: Ciphertext) -> Self {
        BallotBlock {
            election_id: election_id.to_string(),
            index,
            previous,
            ballot,
            hash: Self::compute_hash(election_id, index, &previous, &ballot),
        }
    }

    pub fn compute_hash(
        election_id: &str,
        index: u64,
        previous: &BlockHash,
        ballot: &Ciphertext,
    ) -> BlockHash {
        let mut hasher = Sha256::new();
        hash_id(&mut hasher, election_id);
        hasher.update(&index.to_be_bytes());
        hasher.update(&previous.0);
        hasher.update(&ballot.to_bytes()[..]);
        finish(hasher)
    }

    pub fn is_intact(&self) -> bool {
        self.hash == Self::compute_hash(&self.election_id, self.index, &self.previous, &self.ballot)
    }
}

/// Record created by Link: who runs this service and with which frontend key
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MasterRecord {
    pub roster: Roster,

    #[serde(with = "EdPublicKeyHex")]
    pub key: PublicKey,

    pub admins: Vec<User>,
    pub hash: BlockHash,
}

impl MasterRecord {
    pub fn new(roster: Roster, key: PublicKey, admins: Vec<User>) -> Self {
        let hash = Self::compute_hash(&roster, &key, &admins);
        MasterRecord {
            roster,
            key,
            admins,
            hash,
        }
    }

    pub fn compute_hash(roster: &Roster, key: &PublicKey, admins: &[User]) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(b"master");
        for identity in &roster.list {
            hash_id(&mut hasher, &identity.address);
        }
        hasher.update(key.as_bytes());
        for admin in admins {
            hash_id(&mut hasher, &admin.0);
        }
        finish(hasher)
    }

    pub fn is_admin(&self, user: &User) -> bool {
        self.admins.contains(user)
    }
}

/// One election's chain
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub genesis: GenesisBlock,
    pub blocks: Vec<BallotBlock>,
}

impl Chain {
    pub fn new(genesis: GenesisBlock) -> Self {
        Chain {
            genesis,
            blocks: vec![],
        }
    }

    pub fn tip(&self) -> BlockHash {
        self.blocks
            .last()
            .map(|block| block.hash)
            .unwrap_or(self.genesis.hash)
    }

    /// Recompute every hash from genesis to tip.
    ///
    /// A broken genesis is reported at index 0, the same as a broken first block.
    pub fn verify(&self) -> Result<(), Error> {
        let corruption = |index: u64| Error::Corruption {
            election: self.genesis.election_id.clone(),
            index,
        };

        if !self.genesis.is_intact() {
            return Err(corruption(0));
        }
        let mut previous = self.genesis.hash;
        for (position, block) in self.blocks.iter().enumerate() {
            let index = position as u64;
            if block.index != index
                || block.previous != previous
                || block.election_id != self.genesis.election_id
                || !block.is_intact()
            {
                return Err(corruption(index));
            }
            previous = block.hash;
        }
        Ok(())
    }
}

/// Read-only walk over a chain as it was when the traversal started
#[derive(Debug, Clone)]
pub struct Traversal {
    genesis: GenesisBlock,
    blocks: Arc<Vec<BallotBlock>>,
    position: usize,
}

impl Traversal {
    pub fn genesis(&self) -> &GenesisBlock {
        &self.genesis
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for Traversal {
    type Item = BallotBlock;

    fn next(&mut self) -> Option<BallotBlock> {
        let block = self.blocks.get(self.position)?.clone();
        self.position += 1;
        Some(block)
    }
}

/// Every election's chain. Appends to one chain are serialized by that chain's lock only.
#[derive(Debug, Default)]
pub struct Ledger {
    chains: RwLock<HashMap<String, Arc<Mutex<Chain>>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    fn chain(&self, election_id: &str) -> Result<Arc<Mutex<Chain>>, Error> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(election_id)
            .cloned()
            .ok_or_else(|| Error::ElectionNotFound(election_id.to_string()))
    }

    pub fn contains(&self, election_id: &str) -> bool {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(election_id)
    }

    pub fn create_genesis(&self, election_id: &str) -> Result<GenesisBlock, Error> {
        let mut chains = self.chains.write().unwrap_or_else(PoisonError::into_inner);
        if chains.contains_key(election_id) {
            return Err(Error::ElectionExists(election_id.to_string()));
        }
        let genesis = GenesisBlock::new(election_id);
        chains.insert(
            election_id.to_string(),
            Arc::new(Mutex::new(Chain::new(genesis.clone()))),
        );
        debug!("ledger: created chain {} for {}", genesis.hash, election_id);
        Ok(genesis)
    }

    /// Link `ballot` after the current tip and return the new block
    pub fn append(&self, election_id: &str, ballot: Ciphertext) -> Result<BallotBlock, Error> {
        let chain = self.chain(election_id)?;
        let mut chain = chain.lock().unwrap_or_else(PoisonError::into_inner);

        let index = chain.blocks.len() as u64;
        let previous = match chain.blocks.last() {
            Some(tip) if !tip.is_intact() || tip.index + 1 != index => {
                return Err(Error::Corruption {
                    election: election_id.to_string(),
                    index: tip.index,
                })
            }
            Some(tip) => tip.hash,
            None if !chain.genesis.is_intact() => {
                return Err(Error::Corruption {
                    election: election_id.to_string(),
                    index: 0,
                })
            }
            None => chain.genesis.hash,
        };

        let block = BallotBlock::new(election_id, index, previous, ballot);
        chain.blocks.push(block.clone());
        debug!("ledger: {} block {} is {}", election_id, index, block.hash);
        Ok(block)
    }

    pub fn traverse(&self, election_id: &str) -> Result<Traversal, Error> {
        let chain = self.chain(election_id)?;
        let chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Traversal {
            genesis: chain.genesis.clone(),
            blocks: Arc::new(chain.blocks.clone()),
            position: 0,
        })
    }

    pub fn verify(&self, election_id: &str) -> Result<(), Error> {
        let chain = self.chain(election_id)?;
        let chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
        chain.verify()
    }

    pub fn tip(&self, election_id: &str) -> Result<BlockHash, Error> {
        let chain = self.chain(election_id)?;
        let chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(chain.tip())
    }

    pub fn snapshot(&self) -> BTreeMap<String, Chain> {
        let chains = self.chains.read().unwrap_or_else(PoisonError::into_inner);
        chains
            .iter()
            .map(|(id, chain)| {
                let chain = chain.lock().unwrap_or_else(PoisonError::into_inner);
                (id.clone(), chain.clone())
            })
            .collect()
    }

    pub fn restore(&self, snapshot: BTreeMap<String, Chain>) {
        let mut chains = self.chains.write().unwrap_or_else(PoisonError::into_inner);
        *chains = snapshot
            .into_iter()
            .map(|(id, chain)| (id, Arc::new(Mutex::new(chain))))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot() -> Ciphertext {
        let mut rng = rand::rngs::OsRng {};
        let key = generate_point(&mut rng);
        encrypt(&mut rng, &key, &encode_choice(1))
    }

    #[test]
    fn blocks_link_from_genesis() {
        let ledger = Ledger::new();
        let genesis = ledger.create_genesis("E1").unwrap();
        assert_eq!(genesis.previous, ZERO_HASH);
        assert_eq!(ledger.tip("E1").unwrap(), genesis.hash);

        let first = ledger.append("E1", ballot()).unwrap();
        let second = ledger.append("E1", ballot()).unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.previous, genesis.hash);
        assert_eq!(second.index, 1);
        assert_eq!(second.previous, first.hash);
        assert_eq!(ledger.tip("E1").unwrap(), second.hash);
        ledger.verify("E1").unwrap();

        let mut traversal = ledger.traverse("E1").unwrap();
        let hashes: Vec<BlockHash> = traversal.by_ref().map(|b| b.hash).collect();
        assert_eq!(hashes, vec![first.hash, second.hash]);

        traversal.restart();
        assert_eq!(traversal.next(), Some(first));
    }

    #[test]
    fn traversal_is_a_snapshot() {
        let ledger = Ledger::new();
        ledger.create_genesis("E1").unwrap();
        ledger.append("E1", ballot()).unwrap();

        let traversal = ledger.traverse("E1").unwrap();
        ledger.append("E1", ballot()).unwrap();
        assert_eq!(traversal.count(), 1);
        assert_eq!(ledger.traverse("E1").unwrap().count(), 2);
    }

    #[test]
    fn tampering_is_detected() {
        let ledger = Ledger::new();
        ledger.create_genesis("E1").unwrap();
        for _ in 0..3 {
            ledger.append("E1", ballot()).unwrap();
        }

        let mut snapshot = ledger.snapshot();
        let chain = snapshot.get_mut("E1").unwrap();
        chain.blocks[1].ballot = ballot();
        ledger.restore(snapshot);

        match ledger.verify("E1") {
            Err(Error::Corruption { election, index }) => {
                assert_eq!(election, "E1");
                assert_eq!(index, 1);
            }
            other => panic!("expected corruption, got {:?}", other),
        }

        let mut snapshot = ledger.snapshot();
        snapshot.get_mut("E1").unwrap().blocks[2].index = 7;
        ledger.restore(snapshot);
        let appended = ledger.append("E1", ballot());
        assert_eq!(appended.unwrap_err().kind(), ErrorKind::Corruption);
    }

    #[test]
    fn unknown_and_duplicate_chains() {
        let ledger = Ledger::new();
        assert!(matches!(
            ledger.append("nope", ballot()),
            Err(Error::ElectionNotFound(_))
        ));
        ledger.create_genesis("E1").unwrap();
        assert!(matches!(
            ledger.create_genesis("E1"),
            Err(Error::ElectionExists(_))
        ));
    }

    #[test]
    fn concurrent_appends_are_linearized() {
        let ledger = Arc::new(Ledger::new());
        ledger.create_genesis("E1").unwrap();
        ledger.create_genesis("E2").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    let election = if i % 2 == 0 { "E1" } else { "E2" };
                    (0..10)
                        .map(|_| ledger.append(election, ballot()).unwrap().index)
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut indices: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        indices.sort_unstable();
        let mut expected: Vec<u64> = (0..40).chain(0..40).collect();
        expected.sort_unstable();
        assert_eq!(indices, expected);

        ledger.verify("E1").unwrap();
        ledger.verify("E2").unwrap();
    }
}
