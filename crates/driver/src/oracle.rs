//! The `oracle` module defines the [TraceOracle], the execution-trace generator that replays L2
//! execution for a disputed inbox range.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{BlockNumber, Bytes, H256},
};
use fp_defender_solvers::bisection::ExecutionState;
use std::sync::Arc;

/// The local L2 head reported on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2Block {
    /// The block number.
    pub number: u64,
    /// The block hash.
    pub hash: H256,
    /// The state root after the block.
    pub state_root: H256,
}

/// The [TraceOracle] trait defines the interface of the execution-trace generator.
#[async_trait]
pub trait TraceOracle: Send + Sync {
    /// Returns the current local L2 block.
    async fn current_block(&self) -> Result<L2Block>;

    /// Deterministically replays L2 execution for the inbox range `[start, end)` and returns the
    /// ordered per-step states.
    async fn generate_states(&self, start: u64, end: u64) -> Result<Vec<ExecutionState>>;

    /// Produces the opaque single-step proof for the step starting at `pre_state`.
    async fn one_step_proof(&self, pre_state: &ExecutionState) -> Result<Bytes>;
}

/// A [TraceOracle] served by a trusted L2 node over JSON-RPC.
#[derive(Debug, Clone)]
pub struct RpcTraceOracle {
    /// The HTTP provider for the L2 node.
    node_provider: Arc<Provider<Http>>,
}

impl RpcTraceOracle {
    /// Creates a new [RpcTraceOracle] talking to the node at `endpoint`.
    pub fn try_new(endpoint: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(endpoint)
            .with_context(|| format!("Invalid L2 endpoint {}", endpoint))?;
        Ok(Self {
            node_provider: Arc::new(provider),
        })
    }
}

#[async_trait]
impl TraceOracle for RpcTraceOracle {
    async fn current_block(&self) -> Result<L2Block> {
        let block = self
            .node_provider
            .get_block(BlockNumber::Latest)
            .await?
            .ok_or(anyhow!("L2 node returned no latest block"))?;
        Ok(L2Block {
            number: block.number.ok_or(anyhow!("L2 head has no number"))?.as_u64(),
            hash: block.hash.ok_or(anyhow!("L2 head has no hash"))?,
            state_root: block.state_root,
        })
    }

    async fn generate_states(&self, start: u64, end: u64) -> Result<Vec<ExecutionState>> {
        let states: Vec<ExecutionState> = self
            .node_provider
            .request(
                "proof_generateStates",
                vec![format!("0x{:x}", start), format!("0x{:x}", end)],
            )
            .await?;
        Ok(states)
    }

    async fn one_step_proof(&self, pre_state: &ExecutionState) -> Result<Bytes> {
        let proof: Bytes = self
            .node_provider
            .request("proof_generateOneStepProof", [pre_state])
            .await?;
        Ok(proof)
    }
}
