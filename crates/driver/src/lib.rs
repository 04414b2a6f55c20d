//! The state loops of the fp-defender: confirming assertions once their challenge window
//! passes, and playing the bisection game when one of them is challenged.

use anyhow::Result;
use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Provider, Ws},
    signers::LocalWallet,
};

/// Contains the smart contract bindings used by the drivers.
mod bindings;

mod config;
pub use config::{DriverConfig, DEFAULT_GAS_PRICE};

pub mod base;
pub use base::BaseService;

pub mod defender;
pub use defender::Defender;

pub mod drivers;
pub use drivers::{ChallengeDriver, ConfirmationDriver};

pub mod eth;
pub mod handlers;
pub mod ledger;
pub mod oracle;
pub mod state;
pub mod store;
pub mod types;
mod utils;

#[cfg(test)]
mod test_utils;

/// The L1 client: a websocket provider signing with a local wallet.
pub type SignerMiddlewareWS = SignerMiddleware<Provider<Ws>, LocalWallet>;

/// The [Driver] trait defines the interface for all driver loops that are run by the
/// `fp-defender` binary.
#[async_trait]
pub trait Driver {
    /// Starts the [Driver] loop. Returns once the service stops, or with an error if the loop
    /// hit a failure it cannot recover from.
    async fn start_loop(self) -> Result<()>;
}
