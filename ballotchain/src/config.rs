use crate::*;
use rand::RngCore;
use std::env::var;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    /// This node. Rounds started here are rooted here.
    pub identity: ServerIdentity,

    /// Checked by Link
    pub pin: String,

    /// Where snapshots go. In memory only when unset.
    pub snapshot_path: Option<PathBuf>,

    pub dkg_timeout: Duration,
    pub decrypt_timeout: Duration,

    /// Fan-out of protocol trees
    pub branching: usize,

    /// Fixed decryption threshold. Defaults to a majority of the roster.
    pub threshold: Option<usize>,

    /// Largest ballot choice the tally will decode
    pub max_choice: u32,

    /// Keep secret shares after an election is finalized
    pub retain_shares: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            identity: ServerIdentity::new("local://0"),
            pin: random_pin(),
            snapshot_path: None,
            dkg_timeout: Duration::from_millis(2000),
            decrypt_timeout: Duration::from_millis(5000),
            branching: 2,
            threshold: None,
            max_choice: 255,
            retain_shares: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(|name| var(name).ok())
    }

    /// Build a config from `lookup`, falling back to defaults for anything unset
    pub fn from_vars<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(address) = lookup("BALLOTCHAIN_ADDRESS") {
            config.identity = ServerIdentity::new(address);
        }

        match lookup("BALLOTCHAIN_PIN") {
            Some(pin) if !pin.is_empty() => config.pin = pin,
            _ => log::info!("no pin configured, generated {}", config.pin),
        }

        config.snapshot_path = lookup("BALLOTCHAIN_SNAPSHOT_PATH").map(PathBuf::from);

        if let Some(ms) = parse::<u64, _>(&lookup, "BALLOTCHAIN_DKG_TIMEOUT_MS")? {
            config.dkg_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "BALLOTCHAIN_DECRYPT_TIMEOUT_MS")? {
            config.decrypt_timeout = Duration::from_millis(ms);
        }
        if let Some(branching) = parse(&lookup, "BALLOTCHAIN_TREE_BRANCHING")? {
            if branching == 0 {
                return Err(Error::Config(
                    "BALLOTCHAIN_TREE_BRANCHING must be at least 1".into(),
                ));
            }
            config.branching = branching;
        }
        config.threshold = parse(&lookup, "BALLOTCHAIN_THRESHOLD")?;
        if config.threshold == Some(0) {
            return Err(Error::Config(
                "BALLOTCHAIN_THRESHOLD must be at least 1".into(),
            ));
        }
        if let Some(max_choice) = parse(&lookup, "BALLOTCHAIN_MAX_CHOICE")? {
            config.max_choice = max_choice;
        }
        if let Some(retain) = parse(&lookup, "BALLOTCHAIN_RETAIN_SHARES")? {
            config.retain_shares = retain;
        }

        Ok(config)
    }

    /// Shares needed to decrypt for a roster of `n` nodes
    pub fn threshold_for(&self, n: usize) -> usize {
        match self.threshold {
            Some(threshold) => threshold,
            None => n / 2 + 1,
        }
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{} = {:?}: {}", name, value, e))),
    }
}

fn random_pin() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng {}.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
