//! The election service.
//!
//! Drives the lifecycle `Created -> Open -> Closed -> Finalized` of every election this
//! node coordinates. Opening runs key generation rooted at this node, casting appends
//! to the ballot ledger, and finalizing runs threshold decryption over the whole ledger.
//! Every successful mutation is followed by a snapshot.

use crate::*;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

pub struct ElectionService {
    config: Config,
    registry: ElectionRegistry,
    ledger: Ledger,
    vault: KeyVault,
    overlay: Arc<Overlay>,
    sessions: Arc<dyn SessionValidator>,
    store: Arc<dyn SnapshotStore>,
    master: RwLock<Option<MasterRecord>>,

    /// Set while in-memory state is ahead of the store
    dirty: AtomicBool,
    saving: Mutex<()>,
}

impl ElectionService {
    /// Create the service, restoring the last snapshot in `store` if there is one
    pub fn new(
        config: Config,
        overlay: Arc<Overlay>,
        sessions: Arc<dyn SessionValidator>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, Error> {
        let service = ElectionService {
            config,
            registry: ElectionRegistry::new(),
            ledger: Ledger::new(),
            vault: KeyVault::new(),
            overlay,
            sessions,
            store,
            master: RwLock::new(None),
            dirty: AtomicBool::new(false),
            saving: Mutex::new(()),
        };

        match service.store.load()? {
            Some(snapshot) => {
                info!(
                    "{}: restored {} elections from snapshot",
                    service.config.identity,
                    snapshot.elections.len()
                );
                service.registry.restore(snapshot.elections);
                service.ledger.restore(snapshot.chains);
                service.vault.restore(snapshot.shares);
                *service.master.write().unwrap_or_else(PoisonError::into_inner) = snapshot.master;
                service.verify_restored();
            }
            None => info!("{}: no snapshot, starting empty", service.config.identity),
        }
        Ok(service)
    }

    // A chain that fails verification after a restore stays readable but is closed to
    // every further lifecycle operation
    fn verify_restored(&self) {
        for name in self.registry.names() {
            if let Err(Error::Corruption { index, .. }) = self.ledger.verify(&name) {
                error!("election {}: restored ledger corrupted at block {}", name, index);
                let marked = self.registry.update(&name, |record| {
                    record.corrupted_at = Some(index);
                    Ok(())
                });
                if marked.is_ok() {
                    self.dirty.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    /// Create the service with the store named by `config`: a file if a snapshot path
    /// is set, memory otherwise
    pub fn from_config(
        config: Config,
        overlay: Arc<Overlay>,
        sessions: Arc<dyn SessionValidator>,
    ) -> Result<Self, Error> {
        let store: Arc<dyn SnapshotStore> = match &config.snapshot_path {
            Some(path) => Arc::new(FileStore::new(path)),
            None => Arc::new(MemStore::new()),
        };
        Self::new(config, overlay, sessions, store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ping(&self, request: Ping) -> Ping {
        request
    }

    /// Bind a frontend and its administrators to this service
    pub async fn link(&self, request: Link) -> Result<LinkReply, Error> {
        if request.pin != self.config.pin {
            warn!("{}: link refused, wrong pin", self.config.identity);
            return Err(Error::PinMismatch);
        }
        let roster = Roster::new(request.roster.list)?;
        let record = MasterRecord::new(roster, request.key, request.admins);
        let master = record.hash;

        *self.master.write().unwrap_or_else(PoisonError::into_inner) = Some(record);
        info!("{}: linked, master record {}", self.config.identity, master);
        self.persist().await;
        Ok(LinkReply { master })
    }

    pub fn master(&self) -> Option<MasterRecord> {
        self.master
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Create an election and generate its key.
    ///
    /// If key generation fails the election stays `Created` and the request may be
    /// repeated; the retry runs a fresh round.
    pub async fn open(&self, request: Open) -> Result<OpenReply, Error> {
        if let Some(master) = self.master() {
            if !master.is_admin(&request.admin) {
                return Err(Error::Unauthorized("open an election"));
            }
        }

        let roster = Roster::new(request.roster.list)?;
        let tree = Arc::new(ProtocolTree::nary(
            &roster,
            self.config.branching,
            &self.config.identity,
        )?);
        let election = Election::new(&request.name, request.admin, request.users, roster);

        let slot = self.registry.create(election.clone())?;
        let _guard = slot.lock().await;
        slot.update(|record| {
            record.require(&[ElectionState::Created], "open")?;
            *record = election;
            Ok(())
        })?;

        let threshold = self.config.threshold_for(tree.len());
        let round = Round::Dkg(DkgRound {
            tree: tree.clone(),
            threshold,
            timeout: self.config.dkg_timeout,
        });
        let keys = match round.run(&self.overlay).await.and_then(RoundOutput::into_dkg) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("election {}: key generation failed: {}", request.name, e);
                return Err(e);
            }
        };

        let genesis = self.ledger.create_genesis(&request.name)?;
        for node in tree.nodes() {
            if let Some(secret) = keys.secrets.get(&node.index) {
                self.vault.store(&node.identity, &request.name, secret.clone());
            }
        }
        slot.update(|record| {
            record.set_key(keys.public_key)?;
            record.genesis = Some(genesis.hash);
            record.tip = Some(genesis.hash);
            record.transition(ElectionState::Open, "open")
        })?;

        self.persist().await;
        Ok(OpenReply {
            key: keys.public_key,
            genesis: genesis.hash,
        })
    }

    /// Append an encrypted ballot to an open election
    pub async fn cast(&self, request: Cast) -> Result<CastReply, Error> {
        let slot = self.registry.slot(&request.election)?;
        let _guard = slot.lock().await;

        let election = slot.get();
        election.require(&[ElectionState::Open], "cast")?;
        let user = self.user(&request.token, "cast without a session")?;
        if !election.is_eligible(&user) {
            return Err(Error::Unauthorized("cast in this election"));
        }

        let block = match self.ledger.append(&election.name, request.ballot) {
            Ok(block) => block,
            Err(e) => return Err(self.mark_corrupted(&slot, e).await),
        };
        self.registry
            .update_tip(&election.name, block.hash, block.index + 1)?;

        self.persist().await;
        Ok(CastReply { index: block.index })
    }

    /// Stop accepting ballots
    pub async fn close(&self, request: Close) -> Result<(), Error> {
        let slot = self.registry.slot(&request.election)?;
        let _guard = slot.lock().await;

        let election = slot.get();
        election.require(&[ElectionState::Open], "close")?;
        self.admin(&election, &request.token, "close the election")?;

        slot.update(|record| record.transition(ElectionState::Closed, "close"))?;
        self.persist().await;
        Ok(())
    }

    /// Decrypt every recorded ballot and store the tally.
    ///
    /// Nothing changes unless the whole round succeeds.
    pub async fn finalize(&self, request: Finalize) -> Result<FinalizeReply, Error> {
        let slot = self.registry.slot(&request.election)?;
        let _guard = slot.lock().await;

        let election = slot.get();
        election.require(&[ElectionState::Open, ElectionState::Closed], "finalize")?;
        self.admin(&election, &request.token, "finalize the election")?;

        if let Err(e) = self.ledger.verify(&election.name) {
            return Err(self.mark_corrupted(&slot, e).await);
        }
        let ballots: Vec<Ciphertext> = self
            .ledger
            .traverse(&election.name)?
            .map(|block| block.ballot)
            .collect();

        let tree = Arc::new(ProtocolTree::nary(
            &election.roster,
            self.config.branching,
            &self.config.identity,
        )?);
        let secrets = self.vault.shares_for(&election.name, &tree);
        let round = Round::Decryption(DecryptionRound {
            tree,
            decryption_box: DecryptionBox::new(ballots),
            secrets,
            timeout: self.config.decrypt_timeout,
        });
        let decrypted = match round
            .run(&self.overlay)
            .await
            .and_then(RoundOutput::into_decryption)
        {
            Ok(decrypted) => decrypted,
            Err(e) => {
                warn!("election {}: decryption failed: {}", election.name, e);
                return Err(e);
            }
        };

        let tally = Tally::count(&decrypted.plaintexts, self.config.max_choice);
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        slot.update(|record| {
            record.transition(ElectionState::Finalized, "finalize")?;
            record.tally = Some(tally.clone());
            record.finalized_at = Some(time);
            Ok(())
        })?;

        if !self.config.retain_shares {
            let discarded = self.vault.discard(&election.name);
            info!("election {}: discarded {} shares", election.name, discarded);
        }
        self.persist().await;
        Ok(FinalizeReply { tally, time })
    }

    pub fn election(&self, name: &str) -> Result<Election, Error> {
        self.registry.get(name)
    }

    pub fn elections_for(&self, user: &User) -> Vec<Election> {
        self.registry.elections_for(user)
    }

    /// Every ballot block of `name`, checked against the hash chain
    pub fn ballots(&self, name: &str) -> Result<Vec<BallotBlock>, Error> {
        self.registry.slot(name)?;
        self.ledger.verify(name)?;
        Ok(self.ledger.traverse(name)?.collect())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            elections: self.registry.snapshot(),
            chains: self.ledger.snapshot(),
            shares: self.vault.snapshot(),
            master: self.master(),
        }
    }

    /// Write a snapshot now, surfacing any failure.
    ///
    /// The store is written from the blocking pool so that a slow disk never stalls the
    /// runtime's workers.
    pub async fn flush(&self) -> Result<(), Error> {
        let _saving = self.saving.lock().await;
        let snapshot = self.snapshot();
        let store = self.store.clone();
        let saved = tokio::task::spawn_blocking(move || store.save(&snapshot))
            .await
            .unwrap_or_else(|e| {
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                )))
            });
        match saved {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Whether in-memory state is ahead of the store
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    // Snapshot failures never fail the operation that triggered them
    async fn persist(&self) {
        if let Err(e) = self.flush().await {
            error!("{}: could not save snapshot: {}", self.config.identity, e);
        }
    }

    fn user(&self, token: &str, operation: &'static str) -> Result<User, Error> {
        self.sessions
            .user(token)
            .ok_or(Error::Unauthorized(operation))
    }

    fn admin(&self, election: &Election, token: &str, operation: &'static str) -> Result<User, Error> {
        let user = self.user(token, operation)?;
        if !election.is_admin(&user) {
            return Err(Error::Unauthorized(operation));
        }
        Ok(user)
    }

    async fn mark_corrupted(&self, slot: &ElectionSlot, e: Error) -> Error {
        if let Error::Corruption { election, index } = &e {
            error!("election {}: ledger corrupted at block {}", election, index);
            let index = *index;
            let marked = slot.update(|record| {
                record.corrupted_at = Some(index);
                Ok(())
            });
            if marked.is_ok() {
                self.persist().await;
            }
        }
        e
    }
}
