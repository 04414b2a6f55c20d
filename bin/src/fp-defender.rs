use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, U256},
};
use fp_defender_driver::{
    store::{JsonFileStore, PostgresStore, StateStore},
    BaseService, Defender, DriverConfig, DEFAULT_GAS_PRICE,
};
use std::sync::Arc;
use tracing::Level;

/// Arguments for the `fp-defender` binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    /// The Websocket RPC endpoint of L1, used to index events and send transactions.
    #[arg(
        long,
        short = 'w',
        help = "The Websocket RPC endpoint of L1, used to index events and send transactions.",
        env = "FP_DEFENDER_L1_WS"
    )]
    l1_ws_endpoint: String,

    /// The HTTP RPC endpoint of the local L2 node.
    #[arg(
        long,
        short = 'l',
        help = "The HTTP RPC endpoint of the local L2 node.",
        env = "FP_DEFENDER_L2"
    )]
    l2_endpoint: String,

    /// The address of the rollup contract.
    #[arg(
        long,
        short,
        help = "The address of the rollup contract.",
        env = "FP_DEFENDER_ROLLUP"
    )]
    rollup_address: Address,

    /// The hex-encoded private key of the stake address.
    #[arg(
        long,
        help = "The hex-encoded private key of the stake address.",
        env = "FP_DEFENDER_PRIVATE_KEY",
        hide_env_values = true
    )]
    private_key: String,

    /// The amount to stake on startup, in wei.
    #[arg(
        long,
        help = "The amount to stake on startup, in wei.",
        env = "FP_DEFENDER_STAKE_AMOUNT",
        default_value = "0"
    )]
    stake_amount: String,

    /// The number of L1 blocks a header must be buried under before its timestamp is trusted.
    #[arg(
        long,
        help = "The number of L1 blocks a header must be buried under before its timestamp is trusted.",
        env = "FP_DEFENDER_L1_CONFIRMATIONS",
        default_value_t = 0
    )]
    l1_confirmations: u64,

    /// The gas price attached to every transaction, in wei.
    #[arg(
        long,
        help = "The gas price attached to every transaction, in wei.",
        env = "FP_DEFENDER_GAS_PRICE",
        default_value_t = DEFAULT_GAS_PRICE
    )]
    gas_price: u64,

    /// The file holding the crash-recovery flag.
    #[arg(
        long,
        help = "The file holding the crash-recovery flag.",
        env = "FP_DEFENDER_STATE_PATH",
        default_value = "fp-defender-state.json"
    )]
    state_path: String,

    /// A postgres connection string. Takes precedence over `--state-path`.
    #[arg(
        long,
        help = "A postgres connection string. Takes precedence over --state-path.",
        env = "FP_DEFENDER_DATABASE_URL"
    )]
    database_url: Option<String>,

    /// Stake on startup if the stake address is not staked yet.
    #[arg(long, help = "Stake on startup if the stake address is not staked yet.")]
    stake: bool,

    /// Refuse to start unless the rollup holds no assertions.
    #[arg(long, help = "Refuse to start unless the rollup holds no assertions.")]
    clean_l1: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command arguments
    let Args {
        v,
        l1_ws_endpoint,
        l2_endpoint,
        rollup_address,
        private_key,
        stake_amount,
        l1_confirmations,
        gas_price,
        state_path,
        database_url,
        stake,
        clean_l1,
    } = Args::parse();

    // Initialize the tracing subscriber
    init_tracing_subscriber(v)?;

    let wallet: LocalWallet = private_key
        .trim_start_matches("0x")
        .parse()
        .context("Invalid private key")?;
    let stake_amount = U256::from_dec_str(&stake_amount)
        .map_err(|e| anyhow!("Invalid stake amount {}: {}", stake_amount, e))?;

    // Create the driver config.
    let driver_config = DriverConfig::new(
        l1_ws_endpoint,
        l2_endpoint,
        rollup_address,
        wallet.address(),
        stake_amount,
    )
    .with_l1_confirmations(l1_confirmations)
    .with_gas_price(U256::from(gas_price));
    tracing::info!(target: "fp-defender-cli", "Driver config created successfully, staker: {:?}", driver_config.stake_address);

    let store: Arc<dyn StateStore> = match database_url {
        Some(url) => Arc::new(PostgresStore::connect(&url).await?),
        None => Arc::new(JsonFileStore::new(state_path)),
    };

    // Connect to L1 and L2.
    tracing::debug!(target: "fp-defender-cli", "Connecting to L1 and L2 endpoints...");
    let base = BaseService::connect(driver_config, wallet, store).await?;
    tracing::info!(target: "fp-defender-cli", "Websocket connected @ {}", &base.config.l1_ws_endpoint);

    let defender = Defender::new(Arc::new(base));
    if let Err(e) = defender.start(clean_l1, stake).await {
        tracing::error!(target: "fp-defender-cli", "Critical failure: {:?}", e);
        return Err(e);
    }

    let result = tokio::select! {
        result = defender.wait() => result,
        signal = tokio::signal::ctrl_c() => {
            tracing::info!(target: "fp-defender-cli", "Interrupted, shutting down...");
            signal.map_err(|e| anyhow!(e))
        }
    };
    let stopped = defender.stop().await;

    match result.and(stopped) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(target: "fp-defender-cli", "Critical failure: {:?}", e);
            Err(e)
        }
    }
}

/// Initializes the tracing subscriber
///
/// # Arguments
/// * `verbosity_level` - The verbosity level (0-4)
///
/// # Returns
/// * `Result<()>` - Ok if successful, Err otherwise.
fn init_tracing_subscriber(verbosity_level: u8) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(match verbosity_level {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            3 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
}
