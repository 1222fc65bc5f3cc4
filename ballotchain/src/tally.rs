use crate::*;
use curve25519_dalek::ristretto::RistrettoPoint;
use indexmap::IndexMap;

/// Result of counting the decrypted ballots of one election
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Tally {
    /// Decoded choice of every ballot, in ledger order. A spoiled ballot keeps its
    /// position as `None`.
    pub ballots: Vec<Option<u32>>,

    /// Votes per choice, in order of first appearance
    pub totals: IndexMap<u32, u64>,

    /// Ballots whose plaintext is not a valid choice
    pub spoiled: usize,
}

impl Tally {
    pub fn count(plaintexts: &[RistrettoPoint], max_choice: u32) -> Self {
        let mut tally = Tally::default();
        for plaintext in plaintexts {
            let choice = decode_choice(plaintext, max_choice);
            match choice {
                Some(choice) => *tally.totals.entry(choice).or_insert(0) += 1,
                None => tally.spoiled += 1,
            }
            tally.ballots.push(choice);
        }
        tally
    }

    pub fn num_votes(&self) -> usize {
        self.ballots.len()
    }

    /// Choice with the most votes; ties go to the choice seen first
    pub fn winner(&self) -> Option<u32> {
        let mut winner: Option<(u32, u64)> = None;
        for (choice, total) in &self.totals {
            if winner.map_or(true, |(_, best)| *total > best) {
                winner = Some((*choice, *total));
            }
        }
        winner.map(|(choice, _)| choice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_in_order_of_appearance() {
        let plaintexts: Vec<RistrettoPoint> = [2, 1, 2, 3].iter().map(|c| encode_choice(*c)).collect();
        let mut with_junk = plaintexts.clone();
        with_junk.push(generate_point(&mut rand::rngs::OsRng {}));

        let tally = Tally::count(&with_junk, 10);
        assert_eq!(tally.ballots, vec![Some(2), Some(1), Some(2), Some(3), None]);
        assert_eq!(tally.totals.keys().copied().collect::<Vec<_>>(), vec![2, 1, 3]);
        assert_eq!(tally.totals[&2], 2);
        assert_eq!(tally.spoiled, 1);
        assert_eq!(tally.num_votes(), 5);
        assert_eq!(tally.winner(), Some(2));
    }

    #[test]
    fn spoiled_ballot_keeps_its_position() {
        let plaintexts = vec![
            encode_choice(3),
            generate_point(&mut rand::rngs::OsRng {}),
            encode_choice(7),
            encode_choice(11),
        ];

        let tally = Tally::count(&plaintexts, 10);
        assert_eq!(tally.ballots, vec![Some(3), None, Some(7), None]);
        assert_eq!(tally.spoiled, 2);
        assert_eq!(tally.num_votes(), 4);
        assert_eq!(tally.totals.len(), 2);
    }
}
