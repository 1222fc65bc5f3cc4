//! Distributed key generation over a protocol tree.
//!
//! Every node deals a Feldman-committed polynomial to every other node and sums what it
//! receives into its own share. Start travels down the tree, Done travels back up; the
//! root only reports success once every node below it has finished.

use crate::*;
use crate::protocol::launch;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One node's share of an election key
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SharedSecret {
    /// Roster index of the holder
    pub index: u32,

    #[serde(with = "ScalarHex")]
    pub share: Scalar,

    #[serde(with = "PointHex")]
    pub public_key: RistrettoPoint,

    /// Number of shares needed to decrypt
    pub threshold: usize,
}

/// A DKG round rooted at the first node of `tree`
pub struct DkgRound {
    pub tree: Arc<ProtocolTree>,
    pub threshold: usize,
    pub timeout: Duration,
}

pub struct DkgOutput {
    pub run: RunId,
    pub public_key: RistrettoPoint,

    /// Every node's share, keyed by roster index
    pub secrets: BTreeMap<u32, SharedSecret>,

    /// Every dealer's public commitment, keyed by roster index
    pub commitments: BTreeMap<u32, RistrettoPoint>,
}

#[derive(Debug, Clone)]
pub(crate) enum DkgMessage {
    Start { threshold: usize },
    Deal { commitment: Commitment, share: Scalar },
    Done { public_key: RistrettoPoint, finished: usize },
    Abort(String),
}

struct NodeKeys {
    secret: SharedSecret,
    commitments: BTreeMap<u32, RistrettoPoint>,
}

pub(crate) async fn run_dkg(round: DkgRound, overlay: &Arc<Overlay>) -> Result<DkgOutput, Error> {
    let n = round.tree.len();
    if round.threshold == 0 || round.threshold > n {
        return Err(Error::Config(format!(
            "threshold {} is not achievable with {} nodes",
            round.threshold, n
        )));
    }

    let threshold = round.threshold;
    let (run, outputs) = launch(
        RoundKind::Dkg,
        &round.tree,
        overlay,
        round.timeout,
        move |endpoint: Endpoint<DkgMessage>| {
            let configured = if endpoint.node().is_root() {
                Some(threshold)
            } else {
                None
            };
            participate(endpoint, configured)
        },
    )
    .await?;

    let mut outputs = outputs.into_iter();
    let root = outputs
        .next()
        .ok_or_else(|| Error::Protocol(RoundKind::Dkg, "round produced no output".into()))?;

    let public_key = root.secret.public_key;
    let expected: RistrettoPoint = root.commitments.values().sum();
    if expected != public_key || root.commitments.len() != n {
        return Err(Error::Protocol(
            RoundKind::Dkg,
            "public key does not match the dealt commitments".into(),
        ));
    }

    let mut secrets = BTreeMap::new();
    secrets.insert(root.secret.index, root.secret);
    for node in outputs {
        if node.secret.public_key != public_key {
            return Err(Error::Protocol(
                RoundKind::Dkg,
                format!("node {} derived a different public key", node.secret.index),
            ));
        }
        secrets.insert(node.secret.index, node.secret);
    }

    info!("dkg round {}: established key over {} nodes", run, n);
    Ok(DkgOutput {
        run,
        public_key,
        secrets,
        commitments: root.commitments,
    })
}

async fn participate(
    mut endpoint: Endpoint<DkgMessage>,
    configured: Option<usize>,
) -> Result<NodeKeys, Error> {
    match generate(&mut endpoint, configured).await {
        Ok(keys) => Ok(keys),
        Err(e) => {
            if !endpoint.node().is_root() {
                let _ = endpoint.send_parent(DkgMessage::Abort(e.to_string()));
            }
            Err(e)
        }
    }
}

async fn generate(
    endpoint: &mut Endpoint<DkgMessage>,
    configured: Option<usize>,
) -> Result<NodeKeys, Error> {
    let threshold = match configured {
        Some(threshold) => threshold,
        None => {
            let parent = endpoint.node().parent;
            let start = endpoint
                .expect(|e| Some(e.from) == parent && matches!(e.message, DkgMessage::Start { .. }))
                .await?;
            match start.message {
                DkgMessage::Start { threshold } => threshold,
                other => return Err(unexpected(&other)),
            }
        }
    };
    endpoint.send_children(DkgMessage::Start { threshold })?;

    let n = endpoint.tree().len();
    let me = endpoint.position();
    let index = endpoint.node().index;

    // Deal
    let polynomial = Polynomial::random(&mut rand::rngs::OsRng {}, threshold);
    let own = polynomial.commit();
    for to in (0..n).filter(|to| *to != me) {
        let recipient = endpoint.tree().node(to).index;
        endpoint.send(
            to,
            DkgMessage::Deal {
                commitment: own.clone(),
                share: polynomial.evaluate(recipient),
            },
        )?;
    }

    let mut share = polynomial.evaluate(index);
    let mut commitments = BTreeMap::new();
    commitments.insert(index, own.public());

    // Collect one deal from every other node
    let mut dealt = vec![false; n];
    dealt[me] = true;
    for _ in 1..n {
        let envelope = endpoint
            .expect(|e| matches!(e.message, DkgMessage::Deal { .. }) && !dealt[e.from])
            .await?;
        dealt[envelope.from] = true;
        let dealer = endpoint.tree().node(envelope.from).index;

        if let DkgMessage::Deal {
            commitment,
            share: dealt_share,
        } = envelope.message
        {
            if commitment.points.len() != threshold || !commitment.verify(index, &dealt_share) {
                return Err(Error::Protocol(
                    RoundKind::Dkg,
                    format!("invalid deal from node {}", dealer),
                ));
            }
            share += dealt_share;
            commitments.insert(dealer, commitment.public());
        }
    }

    let public_key: RistrettoPoint = commitments
        .values()
        .fold(RistrettoPoint::identity(), |acc, point| acc + point);
    debug!("dkg round {}: node {} derived its share", endpoint.run(), index);

    // Wait for the subtree
    let mut finished = 1;
    for child in endpoint.node().children.clone() {
        let reply = endpoint
            .expect(|e| {
                e.from == child
                    && matches!(
                        e.message,
                        DkgMessage::Done { .. } | DkgMessage::Abort(_)
                    )
            })
            .await?;
        match reply.message {
            DkgMessage::Done {
                public_key: theirs,
                finished: below,
            } => {
                if theirs != public_key {
                    return Err(Error::Protocol(
                        RoundKind::Dkg,
                        format!("subtree of {} disagrees on the public key", child),
                    ));
                }
                finished += below;
            }
            DkgMessage::Abort(reason) => return Err(Error::Protocol(RoundKind::Dkg, reason)),
            other => return Err(unexpected(&other)),
        }
    }

    if endpoint.node().is_root() {
        if finished != n {
            return Err(Error::IncompleteTree(RoundKind::Dkg, endpoint.run(), finished, n));
        }
    } else {
        endpoint.send_parent(DkgMessage::Done {
            public_key,
            finished,
        })?;
    }

    Ok(NodeKeys {
        secret: SharedSecret {
            index,
            share,
            public_key,
            threshold,
        },
        commitments,
    })
}

fn unexpected(message: &DkgMessage) -> Error {
    let name = match message {
        DkgMessage::Start { .. } => "start",
        DkgMessage::Deal { .. } => "deal",
        DkgMessage::Done { .. } => "done",
        DkgMessage::Abort(_) => "abort",
    };
    Error::Protocol(RoundKind::Dkg, format!("unexpected {} message", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::tests::roster;

    fn round(n: usize, threshold: usize, timeout: Duration) -> DkgRound {
        let roster = roster(n);
        DkgRound {
            tree: Arc::new(ProtocolTree::nary(&roster, 2, &roster.list[0]).unwrap()),
            threshold,
            timeout,
        }
    }

    #[tokio::test]
    async fn key_is_sum_of_commitments() {
        let overlay = Arc::new(Overlay::new());
        let output = run_dkg(round(5, 3, Duration::from_secs(5)), &overlay)
            .await
            .unwrap();

        assert_eq!(output.secrets.len(), 5);
        assert_eq!(output.commitments.len(), 5);
        let sum: RistrettoPoint = output.commitments.values().sum();
        assert_eq!(sum, output.public_key);

        for secret in output.secrets.values() {
            assert_eq!(secret.public_key, output.public_key);
            assert_eq!(secret.threshold, 3);
        }

        let shares: Vec<(u32, Scalar)> = output
            .secrets
            .values()
            .map(|s| (s.index, s.share))
            .collect();
        let recovered = recover_secret(&shares[1..4]);
        assert_eq!(base_mul(&recovered), output.public_key);

        let too_few = recover_secret(&shares[..2]);
        assert_ne!(base_mul(&too_few), output.public_key);
        for (_, share) in &shares {
            assert_ne!(base_mul(share), output.public_key);
        }
    }

    #[tokio::test]
    async fn unreachable_node_times_out() {
        let overlay = Arc::new(Overlay::new());
        let round = round(3, 2, Duration::from_millis(200));
        overlay.disconnect(&round.tree.node(2).identity);

        let result = run_dkg(round, &overlay).await;
        match result {
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::ProtocolTimeout);
                assert!(e.is_retryable());
            }
            Ok(_) => panic!("dkg finished without node 2"),
        }
    }

    #[tokio::test]
    async fn single_node_round() {
        let overlay = Arc::new(Overlay::new());
        let output = run_dkg(round(1, 1, Duration::from_secs(1)), &overlay)
            .await
            .unwrap();
        let secret = &output.secrets[&0];
        assert_eq!(base_mul(&secret.share), output.public_key);
    }

    #[tokio::test]
    async fn rejects_impossible_threshold() {
        let overlay = Arc::new(Overlay::new());
        let result = run_dkg(round(3, 4, Duration::from_secs(1)), &overlay).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
