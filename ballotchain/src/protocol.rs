use crate::*;
use crate::decrypt::run_decryption;
use crate::dkg::run_dkg;
use log::{debug, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

/// Identifier of a single protocol run.
///
/// Every attempt, including a retry after a timeout, gets a fresh one so that late
/// messages from an abandoned run are never mistaken for the current one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        RunId::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    Dkg,
    Decryption,
}

impl std::fmt::Display for RoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            RoundKind::Dkg => "dkg",
            RoundKind::Decryption => "decryption",
        };
        write!(f, "{}", name)
    }
}

/// A protocol round ready to be started from the root of its tree
pub enum Round {
    Dkg(DkgRound),
    Decryption(DecryptionRound),
}

pub enum RoundOutput {
    Dkg(DkgOutput),
    Decryption(DecryptionBox),
}

impl Round {
    pub fn kind(&self) -> RoundKind {
        match self {
            Round::Dkg(_) => RoundKind::Dkg,
            Round::Decryption(_) => RoundKind::Decryption,
        }
    }

    pub async fn run(self, overlay: &Arc<Overlay>) -> Result<RoundOutput, Error> {
        match self {
            Round::Dkg(round) => run_dkg(round, overlay).await.map(RoundOutput::Dkg),
            Round::Decryption(round) => run_decryption(round, overlay)
                .await
                .map(RoundOutput::Decryption),
        }
    }
}

impl RoundOutput {
    pub fn into_dkg(self) -> Result<DkgOutput, Error> {
        match self {
            RoundOutput::Dkg(output) => Ok(output),
            RoundOutput::Decryption(_) => Err(Error::Protocol(
                RoundKind::Dkg,
                "round produced a decryption result".into(),
            )),
        }
    }

    pub fn into_decryption(self) -> Result<DecryptionBox, Error> {
        match self {
            RoundOutput::Decryption(decrypted) => Ok(decrypted),
            RoundOutput::Dkg(_) => Err(Error::Protocol(
                RoundKind::Decryption,
                "round produced a key instead of plaintexts".into(),
            )),
        }
    }
}

/// Spawn one participant task per tree position and drive the root to completion.
///
/// The root runs on the calling task under the round's deadline. If it fails or the
/// deadline passes, every other participant is aborted and whatever it computed is
/// discarded. On success the outputs are returned in tree order, root first.
pub(crate) async fn launch<M, T, F, Fut>(
    kind: RoundKind,
    tree: &Arc<ProtocolTree>,
    overlay: &Arc<Overlay>,
    timeout: Duration,
    mut participant: F,
) -> Result<(RunId, Vec<T>), Error>
where
    M: Send + 'static,
    T: Send + 'static,
    F: FnMut(Endpoint<M>) -> Fut,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    let run = RunId::new();
    let deadline = Instant::now() + timeout;
    debug!("{} round {}: starting over {} nodes", kind, run, tree.len());

    let mut endpoints = overlay.wire::<M>(tree, run).into_iter();
    let root_endpoint = endpoints
        .next()
        .ok_or_else(|| Error::Protocol(kind, "empty protocol tree".into()))?;

    let handles: Vec<JoinHandle<Result<T, Error>>> = endpoints
        .map(|endpoint| {
            let task = participant(endpoint);
            tokio::spawn(async move {
                match timeout_at(deadline, task).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::ProtocolTimeout(kind, run)),
                }
            })
        })
        .collect();

    let root = match timeout_at(deadline, participant(root_endpoint)).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("{} round {}: root failed: {}", kind, run, e);
            abort_all(&handles);
            return Err(e);
        }
        Err(_) => {
            warn!("{} round {}: timed out after {:?}", kind, run, timeout);
            abort_all(&handles);
            return Err(Error::ProtocolTimeout(kind, run));
        }
    };

    let mut outputs = Vec::with_capacity(tree.len());
    outputs.push(root);

    let mut pending = handles.into_iter();
    while let Some(handle) = pending.next() {
        let result = match timeout_at(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Error::Protocol(kind, join_error.to_string())),
            Err(_) => Err(Error::ProtocolTimeout(kind, run)),
        };
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => {
                let rest: Vec<_> = pending.collect();
                abort_all(&rest);
                return Err(e);
            }
        }
    }

    debug!("{} round {}: finished", kind, run);
    Ok((run, outputs))
}

fn abort_all<T>(handles: &[JoinHandle<T>]) {
    for handle in handles {
        handle.abort();
    }
}
