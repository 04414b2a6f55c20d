//! The `base` module contains the [BaseService], the runtime shared by both drivers: the ledger
//! session, the trace oracle, the crash-recovery store, the lifetime signal and the worker join
//! barrier.

use crate::{
    eth::EthLedger,
    ledger::RollupLedger,
    oracle::{L2Block, RpcTraceOracle, TraceOracle},
    store::StateStore,
    DriverConfig,
};
use anyhow::{anyhow, ensure, Context, Result};
use ethers::{
    middleware::SignerMiddleware,
    providers::{Middleware, Provider, Ws},
    signers::{LocalWallet, Signer},
};
use std::{future::Future, sync::Arc};
use tokio::{
    sync::{watch, Mutex},
    task::JoinSet,
};

/// The [BaseService] owns every handle the drivers share. All of it is read-only after
/// construction apart from the lifetime signal and the worker set.
pub struct BaseService {
    /// The configuration of the defender.
    pub config: DriverConfig,
    /// The session over the rollup contracts and the L1 chain.
    pub ledger: Arc<dyn RollupLedger>,
    /// The execution-trace generator.
    pub oracle: Arc<dyn TraceOracle>,
    /// The store holding the crash-recovery flag.
    pub store: Arc<dyn StateStore>,
    /// Flipped to `true` once to stop every driver.
    lifetime: watch::Sender<bool>,
    /// The background workers, joined on stop.
    workers: Mutex<JoinSet<Result<()>>>,
}

impl BaseService {
    /// Creates a new [BaseService] from already constructed collaborators.
    pub fn new(
        config: DriverConfig,
        ledger: Arc<dyn RollupLedger>,
        oracle: Arc<dyn TraceOracle>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let (lifetime, _) = watch::channel(false);
        Self {
            config,
            ledger,
            oracle,
            store,
            lifetime,
            workers: Mutex::new(JoinSet::new()),
        }
    }

    /// Connects to the L1 websocket endpoint with `wallet` as the signer, resolves the rollup's
    /// assertion map, and connects to the L2 node.
    pub async fn connect(
        config: DriverConfig,
        wallet: LocalWallet,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let provider = Provider::<Ws>::connect(config.l1_ws_endpoint.clone())
            .await
            .with_context(|| format!("Failed to connect to L1 @ {}", config.l1_ws_endpoint))?;
        let chain_id = provider
            .get_chainid()
            .await
            .context("Failed to fetch L1 chain id")?;
        tracing::debug!(target: "base-service", "Connected to L1 chain {}", chain_id);

        let client = Arc::new(SignerMiddleware::new(
            provider,
            wallet.with_chain_id(chain_id.as_u64()),
        ));
        let ledger = EthLedger::try_new(client, config.rollup_address, config.gas_price).await?;
        let oracle = RpcTraceOracle::try_new(&config.l2_endpoint)?;

        Ok(Self::new(config, Arc::new(ledger), Arc::new(oracle), store))
    }

    /// Performs the one-time startup checks and returns the local L2 head.
    ///
    /// ### Takes
    /// - `clean_l1`: Require the rollup to hold no assertions yet.
    /// - `stake`: Stake [DriverConfig::stake_amount] if the stake address is not staked yet.
    pub async fn start(&self, clean_l1: bool, stake: bool) -> Result<L2Block> {
        let genesis = self
            .oracle
            .current_block()
            .await
            .context("Failed to read the local L2 head")?;
        tracing::info!(target: "base-service", "Genesis root {:?} at L2 block #{} ({:?})", genesis.state_root, genesis.number, genesis.hash);

        if clean_l1 {
            let last_created = self
                .ledger
                .last_created_assertion_id()
                .await
                .context("Failed to query the last created assertion")?;
            ensure!(
                last_created == 0,
                "Rollup already holds {} assertions, cannot start from a clean L1",
                last_created
            );
        }

        if stake {
            let staker = self.config.stake_address;
            let is_staked = self
                .ledger
                .is_staked(staker)
                .await
                .context("Failed to query stake")?;
            if is_staked {
                tracing::debug!(target: "base-service", "{:?} is already staked", staker);
            } else {
                let tx = self
                    .ledger
                    .stake(self.config.stake_amount)
                    .await
                    .context("Failed to stake")?;
                tracing::info!(target: "base-service", "Staked {} wei from {:?}. Tx hash: {:?}", self.config.stake_amount, staker, tx);
            }
        }

        Ok(genesis)
    }

    /// Returns a receiver of the lifetime signal; it flips to `true` when the service stops.
    pub fn lifetime(&self) -> watch::Receiver<bool> {
        self.lifetime.subscribe()
    }

    /// Spawns a background worker that is joined on [BaseService::stop].
    pub async fn spawn_worker<F>(&self, worker: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.workers.lock().await.spawn(worker);
    }

    /// Waits for the next worker to exit and returns its result. Returns `None` if no workers
    /// are running.
    pub async fn join_next_worker(&self) -> Option<Result<()>> {
        let joined = self.workers.lock().await.join_next().await?;
        Some(flatten_join(joined))
    }

    /// Cancels the lifetime signal and blocks until every worker has exited. Returns the first
    /// worker error, if any.
    pub async fn stop(&self) -> Result<()> {
        self.lifetime.send_replace(true);

        let mut workers = self.workers.lock().await;
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = flatten_join(joined) {
                tracing::error!(target: "base-service", "Worker exited with error: {:?}", e);
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(target: "base-service", "All workers stopped");

        first_error.map_or(Ok(()), Err)
    }
}

fn flatten_join(joined: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(anyhow!("Worker panicked: {}", e)),
    }
}
