//! DeltaDeFi destination venue: REST command client, transaction signing
//! seam and the authenticated account stream.

pub mod account_ws;
pub mod rest;
pub mod signer;
pub mod types;

pub use account_ws::spawn_account_stream;
pub use rest::{CommandClient, DeltaDefiRestClient};
pub use signer::{LocalKeySigner, SignerError, TxSigner};
pub use types::{
    AccountEvent, BalanceUpdateMessage, FillMessage, OrderUpdateMessage, VenueError,
};
