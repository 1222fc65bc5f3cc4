//! The election registry: the node's only map of elections.
//!
//! The map lock is held just long enough to find or insert a slot. Each slot carries
//! its own async guard, which serializes the lifecycle operations of that election
//! (open, cast, close, finalize) without blocking any other election.

use crate::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug)]
pub struct ElectionSlot {
    guard: Arc<Mutex<()>>,
    record: RwLock<Election>,
}

impl ElectionSlot {
    fn new(election: Election) -> Self {
        ElectionSlot {
            guard: Arc::new(Mutex::new(())),
            record: RwLock::new(election),
        }
    }

    pub fn get(&self) -> Election {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to the record, keeping the change only if it succeeds
    pub fn update<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Election) -> Result<T, Error>,
    {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        let mut draft = record.clone();
        let value = f(&mut draft)?;
        *record = draft;
        Ok(value)
    }

    /// Exclusive right to run lifecycle operations on this election
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        self.guard.clone().lock_owned().await
    }
}

#[derive(Debug, Default)]
pub struct ElectionRegistry {
    elections: RwLock<HashMap<String, Arc<ElectionSlot>>>,
}

impl ElectionRegistry {
    pub fn new() -> Self {
        ElectionRegistry::default()
    }

    pub fn slot(&self, name: &str) -> Result<Arc<ElectionSlot>, Error> {
        self.elections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ElectionNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<Election, Error> {
        Ok(self.slot(name)?.get())
    }

    /// Register a new election in the `Created` state.
    ///
    /// An election that never got past `Created` (its key generation failed) keeps its
    /// slot, which is returned as is. The caller replaces the record once it holds the
    /// slot's guard, so that concurrent attempts never overwrite each other.
    pub fn create(&self, election: Election) -> Result<Arc<ElectionSlot>, Error> {
        let mut elections = self
            .elections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = elections.get(&election.name) {
            if slot.get().state != ElectionState::Created {
                return Err(Error::ElectionExists(election.name));
            }
            return Ok(slot.clone());
        }

        let slot = Arc::new(ElectionSlot::new(election.clone()));
        elections.insert(election.name, slot.clone());
        Ok(slot)
    }

    pub fn update<T, F>(&self, name: &str, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Election) -> Result<T, Error>,
    {
        self.slot(name)?.update(f)
    }

    pub fn update_tip(&self, name: &str, tip: BlockHash, ballots: u64) -> Result<(), Error> {
        self.update(name, |election| {
            election.tip = Some(tip);
            election.ballots = ballots;
            Ok(())
        })
    }

    pub fn names(&self) -> Vec<String> {
        let elections = self.elections.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = elections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Elections `user` administers or may vote in, by name
    pub fn elections_for(&self, user: &User) -> Vec<Election> {
        let elections = self.elections.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<Election> = elections
            .values()
            .map(|slot| slot.get())
            .filter(|election| election.concerns(user))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub fn snapshot(&self) -> BTreeMap<String, Election> {
        let elections = self.elections.read().unwrap_or_else(PoisonError::into_inner);
        elections
            .iter()
            .map(|(name, slot)| (name.clone(), slot.get()))
            .collect()
    }

    pub fn restore(&self, snapshot: BTreeMap<String, Election>) {
        let mut elections = self
            .elections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *elections = snapshot
            .into_iter()
            .map(|(name, election)| (name, Arc::new(ElectionSlot::new(election))))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::tests::roster;

    fn election(name: &str) -> Election {
        Election::new(name, User::new("admin"), vec![User::new("alice")], roster(3))
    }

    #[test]
    fn create_get_update() {
        let registry = ElectionRegistry::new();
        assert!(matches!(
            registry.get("E1"),
            Err(Error::ElectionNotFound(_))
        ));

        registry.create(election("E1")).unwrap();
        registry
            .update("E1", |e| e.transition(ElectionState::Open, "open"))
            .unwrap();
        assert_eq!(registry.get("E1").unwrap().state, ElectionState::Open);

        assert!(matches!(
            registry.create(election("E1")),
            Err(Error::ElectionExists(_))
        ));
    }

    #[test]
    fn failed_update_leaves_record_untouched() {
        let registry = ElectionRegistry::new();
        registry.create(election("E1")).unwrap();

        let result = registry.update("E1", |e| {
            e.ballots = 99;
            e.transition(ElectionState::Finalized, "finalize")
        });
        assert!(result.is_err());
        assert_eq!(registry.get("E1").unwrap().ballots, 0);
    }

    #[test]
    fn created_election_keeps_its_slot() {
        let registry = ElectionRegistry::new();
        let first = registry.create(election("E1")).unwrap();
        let second = registry.create(election("E1")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        second
            .update(|e| {
                e.users.clear();
                Ok(())
            })
            .unwrap();
        assert!(registry.get("E1").unwrap().users.is_empty());
    }

    #[test]
    fn elections_for_user() {
        let registry = ElectionRegistry::new();
        registry.create(election("E2")).unwrap();
        registry.create(election("E1")).unwrap();
        registry
            .create(Election::new("E3", User::new("other"), vec![], roster(1)))
            .unwrap();

        let names = |user: &str| -> Vec<String> {
            registry
                .elections_for(&User::new(user))
                .into_iter()
                .map(|e| e.name)
                .collect()
        };
        assert_eq!(names("alice"), vec!["E1", "E2"]);
        assert_eq!(names("other"), vec!["E3"]);
        assert!(names("mallory").is_empty());
        assert_eq!(registry.names(), vec!["E1", "E2", "E3"]);
    }

    #[tokio::test]
    async fn slot_guard_is_exclusive() {
        let registry = ElectionRegistry::new();
        let slot = registry.create(election("E1")).unwrap();
        let held = slot.lock().await;
        assert!(slot.guard.try_lock().is_err());
        drop(held);
        assert!(slot.guard.try_lock().is_ok());
    }
}
