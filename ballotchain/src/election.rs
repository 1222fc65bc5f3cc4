use crate::*;
use curve25519_dalek::ristretto::RistrettoPoint;

/// An authenticated caller, as resolved from a session token
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct User(pub String);

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        User(id.into())
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Election lifecycle. Transitions only move forward.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElectionState {
    Created,
    Open,
    Closed,
    Finalized,
}

impl ElectionState {
    pub fn can_transition_to(self, next: ElectionState) -> bool {
        use ElectionState::*;
        matches!(
            (self, next),
            (Created, Open) | (Open, Closed) | (Open, Finalized) | (Closed, Finalized)
        )
    }
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ElectionState::Created => "created",
            ElectionState::Open => "open",
            ElectionState::Closed => "closed",
            ElectionState::Finalized => "finalized",
        };
        write!(f, "{}", name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Election {
    pub name: String,

    pub admin: User,

    /// Voters allowed to cast. Empty means anyone with a valid session.
    pub users: Vec<User>,

    pub roster: Roster,

    /// Shared public key. Set once, when the election opens.
    #[serde(with = "OptionPointHex")]
    pub key: Option<RistrettoPoint>,

    pub genesis: Option<BlockHash>,
    pub tip: Option<BlockHash>,

    /// Number of ballots cast
    pub ballots: u64,

    pub state: ElectionState,

    pub tally: Option<Tally>,

    /// Unix seconds
    pub finalized_at: Option<u64>,

    /// First block that failed verification. A corrupted election accepts no further mutation.
    pub corrupted_at: Option<u64>,
}

impl Election {
    pub fn new(name: &str, admin: User, users: Vec<User>, roster: Roster) -> Self {
        Election {
            name: name.to_string(),
            admin,
            users,
            roster,
            key: None,
            genesis: None,
            tip: None,
            ballots: 0,
            state: ElectionState::Created,
            tally: None,
            finalized_at: None,
            corrupted_at: None,
        }
    }

    pub fn transition(&mut self, next: ElectionState, operation: &'static str) -> Result<(), Error> {
        if !self.state.can_transition_to(next) {
            return Err(self.invalid_state(operation));
        }
        log::info!("election {}: {} -> {}", self.name, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Fail unless the election is in one of `states`
    pub fn require(&self, states: &[ElectionState], operation: &'static str) -> Result<(), Error> {
        if let Some(index) = self.corrupted_at {
            return Err(Error::Corruption {
                election: self.name.clone(),
                index,
            });
        }
        if !states.contains(&self.state) {
            return Err(self.invalid_state(operation));
        }
        Ok(())
    }

    pub fn set_key(&mut self, key: RistrettoPoint) -> Result<(), Error> {
        if self.key.is_some() {
            return Err(Error::KeyAlreadySet(self.name.clone()));
        }
        self.key = Some(key);
        Ok(())
    }

    pub fn is_admin(&self, user: &User) -> bool {
        self.admin == *user
    }

    pub fn is_eligible(&self, user: &User) -> bool {
        self.users.is_empty() || self.users.contains(user)
    }

    /// Whether `user` administers or may vote in this election
    pub fn concerns(&self, user: &User) -> bool {
        self.is_admin(user) || self.users.contains(user)
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            name: self.name.clone(),
            state: self.state,
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::tests::roster;

    fn election() -> Election {
        Election::new("E1", User::new("admin"), vec![], roster(3))
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        let mut election = election();
        assert!(election.transition(ElectionState::Closed, "close").is_err());

        election.transition(ElectionState::Open, "open").unwrap();
        election.transition(ElectionState::Closed, "close").unwrap();
        assert!(election.transition(ElectionState::Open, "open").is_err());
        election.transition(ElectionState::Finalized, "finalize").unwrap();

        let err = election.require(&[ElectionState::Open], "cast").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(
            err.to_string(),
            "ballotchain: election E1 is finalized, cannot cast"
        );
    }

    #[test]
    fn key_is_set_once() {
        let mut election = election();
        let key = generate_point(&mut rand::rngs::OsRng {});
        election.set_key(key).unwrap();
        assert!(matches!(
            election.set_key(key),
            Err(Error::KeyAlreadySet(_))
        ));
        assert_eq!(election.key, Some(key));
    }

    #[test]
    fn eligibility() {
        let mut election = election();
        let alice = User::new("alice");
        assert!(election.is_eligible(&alice));
        assert!(!election.concerns(&alice));

        election.users.push(User::new("bob"));
        assert!(!election.is_eligible(&alice));
        assert!(election.concerns(&User::new("bob")));
        assert!(election.concerns(&User::new("admin")));
    }

    #[test]
    fn corrupted_elections_refuse_everything() {
        let mut election = election();
        election.transition(ElectionState::Open, "open").unwrap();
        election.corrupted_at = Some(4);
        let err = election.require(&[ElectionState::Open], "cast").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
    }
}
