//! Threshold decryption over a protocol tree.
//!
//! The round runs in two passes. Announce/Reply walks the tree first and counts the
//! nodes that answer, so the root learns the quorum before any share is used. Prompt
//! then carries the ballots down and Terminate carries the summed, Lagrange-weighted
//! partial decryptions back up. A node forwards Terminate only once every child has
//! answered; the root never returns a partially aggregated box.

use crate::*;
use crate::protocol::launch;
use curve25519_dalek::ristretto::RistrettoPoint;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Ciphertexts submitted for decryption, and their plaintexts once the round is done
#[derive(Debug, Clone, Default)]
pub struct DecryptionBox {
    pub ballots: Vec<Ciphertext>,
    pub plaintexts: Vec<RistrettoPoint>,
}

impl DecryptionBox {
    pub fn new(ballots: Vec<Ciphertext>) -> Self {
        DecryptionBox {
            ballots,
            plaintexts: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }

    pub fn is_decrypted(&self) -> bool {
        self.plaintexts.len() == self.ballots.len()
    }
}

pub struct DecryptionRound {
    pub tree: Arc<ProtocolTree>,
    pub decryption_box: DecryptionBox,

    /// Shares of the nodes in `tree`, keyed by roster index. Each participant is
    /// handed its own share only.
    pub secrets: BTreeMap<u32, SharedSecret>,

    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub(crate) enum DecryptMessage {
    Announce,
    Reply {
        descendants: usize,
        indices: Vec<u32>,
    },
    Prompt {
        quorum: Arc<Vec<u32>>,
        ballots: Arc<Vec<Ciphertext>>,
    },
    Terminate {
        shares: Vec<RistrettoPoint>,
        contributors: usize,
    },
    Abort(String),
}

pub(crate) async fn run_decryption(
    round: DecryptionRound,
    overlay: &Arc<Overlay>,
) -> Result<DecryptionBox, Error> {
    let DecryptionRound {
        tree,
        decryption_box,
        mut secrets,
        timeout,
    } = round;

    let mut public_key = None;
    for node in tree.nodes() {
        let secret = secrets.get(&node.index).ok_or_else(|| {
            Error::Protocol(
                RoundKind::Decryption,
                format!("{} holds no share for this key", node.identity),
            )
        })?;
        match public_key {
            None => public_key = Some(secret.public_key),
            Some(key) if key != secret.public_key => {
                return Err(Error::Protocol(
                    RoundKind::Decryption,
                    "shares belong to different keys".into(),
                ))
            }
            Some(_) => {}
        }
    }

    let ballots = Arc::new(decryption_box.ballots);
    let root_ballots = ballots.clone();
    let (run, mut outputs) = launch(
        RoundKind::Decryption,
        &tree,
        overlay,
        timeout,
        move |endpoint: Endpoint<DecryptMessage>| {
            let secret = secrets.remove(&endpoint.node().index);
            let ballots = if endpoint.node().is_root() {
                Some(root_ballots.clone())
            } else {
                None
            };
            participate(endpoint, secret, ballots)
        },
    )
    .await?;

    let plaintexts = match outputs.first_mut().and_then(Option::take) {
        Some(plaintexts) => plaintexts,
        None => {
            return Err(Error::Protocol(
                RoundKind::Decryption,
                "root produced no plaintexts".into(),
            ))
        }
    };

    info!(
        "decryption round {}: decrypted {} ballots",
        run,
        plaintexts.len()
    );
    Ok(DecryptionBox {
        ballots: Arc::try_unwrap(ballots).unwrap_or_else(|shared| (*shared).clone()),
        plaintexts,
    })
}

/// Returns the plaintexts at the root and `None` everywhere else
async fn participate(
    mut endpoint: Endpoint<DecryptMessage>,
    secret: Option<SharedSecret>,
    ballots: Option<Arc<Vec<Ciphertext>>>,
) -> Result<Option<Vec<RistrettoPoint>>, Error> {
    let result = match secret {
        Some(secret) => decrypt(&mut endpoint, &secret, ballots).await,
        None => Err(Error::Protocol(
            RoundKind::Decryption,
            format!("{} holds no share", endpoint.node().identity),
        )),
    };
    if let Err(e) = &result {
        if !endpoint.node().is_root() {
            let _ = endpoint.send_parent(DecryptMessage::Abort(e.to_string()));
        }
    }
    result
}

async fn decrypt(
    endpoint: &mut Endpoint<DecryptMessage>,
    secret: &SharedSecret,
    ballots: Option<Arc<Vec<Ciphertext>>>,
) -> Result<Option<Vec<RistrettoPoint>>, Error> {
    let n = endpoint.tree().len();
    let parent = endpoint.node().parent;
    let children = endpoint.node().children.clone();

    // Announce / Reply
    if !endpoint.node().is_root() {
        endpoint.expect(|e| Some(e.from) == parent && matches!(e.message, DecryptMessage::Announce))
            .await?;
    }
    endpoint.send_children(DecryptMessage::Announce)?;

    let mut descendants = 0;
    let mut indices = vec![secret.index];
    for child in &children {
        let reply = from_child(endpoint, *child).await?;
        match reply {
            DecryptMessage::Reply {
                descendants: below,
                indices: theirs,
            } => {
                descendants += below;
                indices.extend(theirs);
            }
            other => return Err(unexpected(&other)),
        }
    }

    let (quorum, ballots) = match ballots {
        Some(ballots) => {
            if descendants + 1 != n || indices.len() != n {
                return Err(Error::IncompleteTree(
                    RoundKind::Decryption,
                    endpoint.run(),
                    descendants + 1,
                    n,
                ));
            }
            if indices.len() < secret.threshold {
                return Err(Error::NotEnoughShares(secret.threshold, indices.len()));
            }
            indices.sort_unstable();
            let quorum = Arc::new(indices);
            debug!(
                "decryption round {}: all {} nodes answered",
                endpoint.run(),
                n
            );
            endpoint.send_children(DecryptMessage::Prompt {
                quorum: quorum.clone(),
                ballots: ballots.clone(),
            })?;
            (quorum, ballots)
        }
        None => {
            endpoint.send_parent(DecryptMessage::Reply {
                descendants: descendants + 1,
                indices,
            })?;
            let prompt = endpoint
                .expect(|e| {
                    Some(e.from) == parent
                        && matches!(
                            e.message,
                            DecryptMessage::Prompt { .. } | DecryptMessage::Abort(_)
                        )
                })
                .await?;
            match prompt.message {
                DecryptMessage::Prompt { quorum, ballots } => {
                    endpoint.send_children(DecryptMessage::Prompt {
                        quorum: quorum.clone(),
                        ballots: ballots.clone(),
                    })?;
                    (quorum, ballots)
                }
                DecryptMessage::Abort(reason) => {
                    return Err(Error::Protocol(RoundKind::Decryption, reason))
                }
                other => return Err(unexpected(&other)),
            }
        }
    };

    // Prompt / Terminate
    if !quorum.contains(&secret.index) {
        return Err(Error::Protocol(
            RoundKind::Decryption,
            format!("node {} is not part of the quorum", secret.index),
        ));
    }
    let weight = lagrange_coefficient(secret.index, &quorum);
    let mut shares: Vec<RistrettoPoint> = ballots
        .iter()
        .map(|ciphertext| partial_decrypt(&secret.share, ciphertext) * weight)
        .collect();

    let mut contributors = 1;
    for child in &children {
        match from_child(endpoint, *child).await? {
            DecryptMessage::Terminate {
                shares: theirs,
                contributors: below,
            } => {
                if theirs.len() != shares.len() {
                    return Err(Error::Protocol(
                        RoundKind::Decryption,
                        format!(
                            "child {} returned {} partials for {} ballots",
                            child,
                            theirs.len(),
                            shares.len()
                        ),
                    ));
                }
                for (mine, other) in shares.iter_mut().zip(theirs) {
                    *mine += other;
                }
                contributors += below;
            }
            other => return Err(unexpected(&other)),
        }
    }

    if !endpoint.node().is_root() {
        endpoint.send_parent(DecryptMessage::Terminate {
            shares,
            contributors,
        })?;
        return Ok(None);
    }

    if contributors != quorum.len() {
        return Err(Error::IncompleteTree(
            RoundKind::Decryption,
            endpoint.run(),
            contributors,
            quorum.len(),
        ));
    }

    let plaintexts = ballots
        .iter()
        .zip(shares.iter())
        .map(|(ciphertext, combined)| aggregate(ciphertext, combined))
        .collect();
    Ok(Some(plaintexts))
}

/// Next Reply or Terminate from `child`, with Abort turned into an error
async fn from_child(
    endpoint: &mut Endpoint<DecryptMessage>,
    child: usize,
) -> Result<DecryptMessage, Error> {
    let envelope = endpoint
        .expect(|e| {
            e.from == child
                && matches!(
                    e.message,
                    DecryptMessage::Reply { .. }
                        | DecryptMessage::Terminate { .. }
                        | DecryptMessage::Abort(_)
                )
        })
        .await?;
    match envelope.message {
        DecryptMessage::Abort(reason) => Err(Error::Protocol(RoundKind::Decryption, reason)),
        message => Ok(message),
    }
}

fn unexpected(message: &DecryptMessage) -> Error {
    let name = match message {
        DecryptMessage::Announce => "announce",
        DecryptMessage::Reply { .. } => "reply",
        DecryptMessage::Prompt { .. } => "prompt",
        DecryptMessage::Terminate { .. } => "terminate",
        DecryptMessage::Abort(_) => "abort",
    };
    Error::Protocol(RoundKind::Decryption, format!("unexpected {} message", name))
}
