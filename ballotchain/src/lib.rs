#[macro_use]
extern crate serde;

mod api;
mod config;
mod decrypt;
mod dkg;
mod election;
mod error;
mod group;
mod ledger;
mod overlay;
mod protocol;
mod registry;
mod roster;
mod serde_hex;
mod service;
mod session;
mod store;
mod tally;
mod vault;

pub use api::*;
pub use config::*;
pub use decrypt::*;
pub use dkg::*;
pub use election::*;
pub use error::*;
pub use group::*;
pub use ledger::*;
pub use overlay::*;
pub use protocol::*;
pub use registry::*;
pub use roster::*;
pub use serde_hex::*;
pub use service::*;
pub use session::*;
pub use store::*;
pub use tally::*;
pub use vault::*;
