use crate::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Custody of secret shares.
///
/// Shares are filed under the node that holds them. A decryption round only ever
/// collects, for each tree position, the share filed under that position's node.
#[derive(Debug, Default)]
pub struct KeyVault {
    shares: RwLock<HashMap<ServerIdentity, BTreeMap<String, SharedSecret>>>,
}

impl KeyVault {
    pub fn new() -> Self {
        KeyVault::default()
    }

    pub fn store(&self, holder: &ServerIdentity, election: &str, secret: SharedSecret) {
        let mut shares = self.shares.write().unwrap_or_else(PoisonError::into_inner);
        shares
            .entry(holder.clone())
            .or_default()
            .insert(election.to_string(), secret);
    }

    pub fn get(&self, holder: &ServerIdentity, election: &str) -> Option<SharedSecret> {
        let shares = self.shares.read().unwrap_or_else(PoisonError::into_inner);
        shares.get(holder)?.get(election).cloned()
    }

    /// Shares of every node in `tree` for `election`, keyed by roster index
    pub fn shares_for(&self, election: &str, tree: &ProtocolTree) -> BTreeMap<u32, SharedSecret> {
        let shares = self.shares.read().unwrap_or_else(PoisonError::into_inner);
        tree.nodes()
            .iter()
            .filter_map(|node| {
                shares
                    .get(&node.identity)
                    .and_then(|held| held.get(election))
                    .filter(|secret| secret.index == node.index)
                    .map(|secret| (node.index, secret.clone()))
            })
            .collect()
    }

    /// Destroy every share of `election`
    pub fn discard(&self, election: &str) -> usize {
        let mut shares = self.shares.write().unwrap_or_else(PoisonError::into_inner);
        shares
            .values_mut()
            .filter_map(|held| held.remove(election))
            .count()
    }

    /// Shares keyed by holder address, then election
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, SharedSecret>> {
        let shares = self.shares.read().unwrap_or_else(PoisonError::into_inner);
        shares
            .iter()
            .map(|(holder, held)| (holder.address.clone(), held.clone()))
            .collect()
    }

    pub fn restore(&self, snapshot: BTreeMap<String, BTreeMap<String, SharedSecret>>) {
        let mut shares = self.shares.write().unwrap_or_else(PoisonError::into_inner);
        *shares = snapshot
            .into_iter()
            .map(|(address, held)| (ServerIdentity::new(address), held))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::tests::roster;
    use curve25519_dalek::scalar::Scalar;

    fn secret(index: u32) -> SharedSecret {
        SharedSecret {
            index,
            share: Scalar::from(index as u64 + 10),
            public_key: encode_choice(1),
            threshold: 2,
        }
    }

    #[test]
    fn shares_follow_their_holder() {
        let roster = roster(3);
        let tree = ProtocolTree::nary(&roster, 2, &roster.list[1]).unwrap();
        let vault = KeyVault::new();
        for (index, node) in roster.list.iter().enumerate() {
            vault.store(node, "E1", secret(index as u32));
        }
        vault.store(&roster.list[0], "E2", secret(0));

        let shares = vault.shares_for("E1", &tree);
        assert_eq!(shares.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(vault.get(&roster.list[2], "E1"), Some(secret(2)));

        assert_eq!(vault.discard("E1"), 3);
        assert!(vault.shares_for("E1", &tree).is_empty());
        assert!(vault.get(&roster.list[0], "E2").is_some());
    }
}
