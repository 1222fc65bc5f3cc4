//! In-process stand-in for the node-to-node messaging substrate.
//!
//! Every protocol run gets its own set of mailboxes, one per tree position. Delivery is
//! in order per sender; messages to or from a node the overlay considers unreachable are
//! silently dropped, which is how a crashed or partitioned node looks to its peers.

use crate::*;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// A protocol message tagged with its run and sender position
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    pub run: RunId,
    pub from: usize,
    pub message: M,
}

#[derive(Debug, Default)]
pub struct Overlay {
    unreachable: RwLock<HashSet<ServerIdentity>>,
}

impl Overlay {
    pub fn new() -> Self {
        Overlay::default()
    }

    pub fn disconnect(&self, identity: &ServerIdentity) {
        if let Ok(mut unreachable) = self.unreachable.write() {
            unreachable.insert(identity.clone());
        }
    }

    pub fn reconnect(&self, identity: &ServerIdentity) {
        if let Ok(mut unreachable) = self.unreachable.write() {
            unreachable.remove(identity);
        }
    }

    pub fn is_reachable(&self, identity: &ServerIdentity) -> bool {
        match self.unreachable.read() {
            Ok(unreachable) => !unreachable.contains(identity),
            Err(_) => false,
        }
    }

    /// Create the mailboxes of one run, returning one endpoint per tree position
    pub fn wire<M: Send + 'static>(
        self: &Arc<Self>,
        tree: &Arc<ProtocolTree>,
        run: RunId,
    ) -> Vec<Endpoint<M>> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..tree.len()).map(|_| mpsc::unbounded_channel()).unzip();
        let senders = Arc::new(senders);

        receivers
            .into_iter()
            .enumerate()
            .map(|(position, inbox)| Endpoint {
                run,
                position,
                tree: tree.clone(),
                overlay: self.clone(),
                peers: senders.clone(),
                inbox,
                stash: VecDeque::new(),
            })
            .collect()
    }
}

/// One node's view of a run: its own mailbox plus handles to everyone else's
pub struct Endpoint<M> {
    run: RunId,
    position: usize,
    tree: Arc<ProtocolTree>,
    overlay: Arc<Overlay>,
    peers: Arc<Vec<mpsc::UnboundedSender<Envelope<M>>>>,
    inbox: mpsc::UnboundedReceiver<Envelope<M>>,
    stash: VecDeque<Envelope<M>>,
}

impl<M: Send + 'static> Endpoint<M> {
    pub fn run(&self) -> RunId {
        self.run
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn node(&self) -> &TreeNode {
        self.tree.node(self.position)
    }

    pub fn tree(&self) -> &ProtocolTree {
        &self.tree
    }

    pub fn send(&self, to: usize, message: M) -> Result<(), Error> {
        let from = &self.tree.node(self.position).identity;
        let target = &self.tree.node(to).identity;
        if !self.overlay.is_reachable(from) || !self.overlay.is_reachable(target) {
            log::trace!("run {}: dropping message {} -> {}", self.run, from, target);
            return Ok(());
        }

        let envelope = Envelope {
            run: self.run,
            from: self.position,
            message,
        };
        self.peers[to]
            .send(envelope)
            .map_err(|_| Error::Transport(format!("mailbox of {} is closed", target)))
    }

    pub fn send_parent(&self, message: M) -> Result<(), Error> {
        match self.node().parent {
            Some(parent) => self.send(parent, message),
            None => Err(Error::Transport("root has no parent".into())),
        }
    }

    pub fn send_children(&self, message: M) -> Result<(), Error>
    where
        M: Clone,
    {
        for child in self.node().children.clone() {
            self.send(child, message.clone())?;
        }
        Ok(())
    }

    /// Wait for the first message accepted by `accept`.
    ///
    /// Messages that arrive early for a later step are kept and offered again on the
    /// next call.
    pub async fn expect<F>(&mut self, mut accept: F) -> Result<Envelope<M>, Error>
    where
        F: FnMut(&Envelope<M>) -> bool,
    {
        if let Some(found) = self.stash.iter().position(|envelope| accept(envelope)) {
            if let Some(envelope) = self.stash.remove(found) {
                return Ok(envelope);
            }
        }

        loop {
            let envelope = self
                .inbox
                .recv()
                .await
                .ok_or_else(|| Error::Transport("inbox closed".into()))?;

            if envelope.run != self.run {
                log::debug!(
                    "run {}: discarding stale message from run {}",
                    self.run,
                    envelope.run
                );
                continue;
            }
            if accept(&envelope) {
                return Ok(envelope);
            }
            self.stash.push_back(envelope);
        }
    }
}
