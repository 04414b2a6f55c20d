//! The `config` module contains the [DriverConfig].

use ethers::types::{Address, U256};

/// The fixed legacy gas price attached to every transaction, in wei.
pub const DEFAULT_GAS_PRICE: u64 = 800_000_000;

/// The [DriverConfig] struct contains the configuration for the [Driver](crate::Driver)
/// implementations.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// The websocket RPC endpoint of the base ledger, used to index events and send
    /// transactions.
    pub l1_ws_endpoint: String,
    /// The HTTP RPC endpoint of the local L2 node that replays execution traces.
    pub l2_endpoint: String,
    /// The address of the rollup (assertion registry) contract.
    pub rollup_address: Address,
    /// The address we stake and respond with. Derived from the signer.
    pub stake_address: Address,
    /// The amount staked on startup if we are not yet staked.
    pub stake_amount: U256,
    /// The number of L1 blocks a header must be buried under before its timestamp is trusted
    /// for confirmations. `0` disables the lag.
    pub l1_confirmations: u64,
    /// The gas price attached to every transaction.
    pub gas_price: U256,
}

impl DriverConfig {
    /// Creates a new [DriverConfig] with the given configuration, a disabled confirmation lag and
    /// the default gas price.
    pub fn new(
        l1_ws_endpoint: String,
        l2_endpoint: String,
        rollup_address: Address,
        stake_address: Address,
        stake_amount: U256,
    ) -> Self {
        Self {
            l1_ws_endpoint,
            l2_endpoint,
            rollup_address,
            stake_address,
            stake_amount,
            l1_confirmations: 0,
            gas_price: U256::from(DEFAULT_GAS_PRICE),
        }
    }

    /// Sets the number of L1 confirmations required before a header is trusted.
    pub fn with_l1_confirmations(mut self, l1_confirmations: u64) -> Self {
        self.l1_confirmations = l1_confirmations;
        self
    }

    /// Sets the gas price attached to every transaction.
    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = gas_price;
        self
    }
}
