//! The `eth` module implements the [RollupLedger] and [ChallengeSession] traits against the base
//! ledger over a websocket provider.

use crate::{
    bindings::{
        AssertionChallengedFilter, AssertionConfirmedFilter, AssertionCreatedFilter, AssertionMap,
        BisectedFilter, ChallengeCompletedFilter, IChallenge, IRollup,
    },
    ledger::{ChallengeSession, RollupLedger, Subscription, SUBSCRIPTION_BUFFER},
    types::{
        to_u64, Assertion, AssertionChallenged, AssertionConfirmed, AssertionCreated, Bisected,
        ChallengeCompleted, Header,
    },
    SignerMiddlewareWS,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ethers::{
    abi::{Detokenize, RawLog},
    contract::EthLogDecode,
    prelude::ContractCall,
    providers::{Middleware, StreamExt},
    types::{Address, Block, BlockNumber, Bytes, Filter, H256, U256},
};
use fp_defender_solvers::bisection::{Commitment, Segment};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// The [EthLedger] is the production [RollupLedger], backed by the rollup and assertion map
/// contracts.
#[derive(Debug, Clone)]
pub struct EthLedger {
    /// The signing client used to read state and send transactions on L1.
    client: Arc<SignerMiddlewareWS>,
    /// The rollup contract.
    rollup: IRollup<SignerMiddlewareWS>,
    /// The assertion map contract, resolved from the rollup.
    assertion_map: AssertionMap<SignerMiddlewareWS>,
    /// The gas price attached to every transaction.
    gas_price: U256,
}

impl EthLedger {
    /// Creates a new [EthLedger], resolving the assertion map contract from the rollup.
    pub async fn try_new(
        client: Arc<SignerMiddlewareWS>,
        rollup_address: Address,
        gas_price: U256,
    ) -> Result<Self> {
        let rollup = IRollup::new(rollup_address, Arc::clone(&client));
        let assertion_map_address = pending(rollup.assertions())
            .call()
            .await
            .with_context(|| format!("Failed to resolve assertion map from rollup {:?}", rollup_address))?;
        tracing::debug!(target: "eth-ledger", "Resolved assertion map @ {:?}", assertion_map_address);

        Ok(Self {
            assertion_map: AssertionMap::new(assertion_map_address, Arc::clone(&client)),
            client,
            rollup,
            gas_price,
        })
    }
}

#[async_trait]
impl RollupLedger for EthLedger {
    async fn last_resolved_assertion_id(&self) -> Result<u64> {
        to_u64(pending(self.rollup.last_resolved_assertion_id()).call().await?)
    }

    async fn last_created_assertion_id(&self) -> Result<u64> {
        to_u64(pending(self.rollup.last_created_assertion_id()).call().await?)
    }

    async fn assertion(&self, id: u64) -> Result<Assertion> {
        let (state_hash, inbox_size, parent, deadline, proposal_time) =
            pending(self.assertion_map.assertions(U256::from(id)))
                .call()
                .await?;
        Ok(Assertion {
            id,
            state_hash: H256::from(state_hash),
            inbox_size: to_u64(inbox_size)?,
            parent: to_u64(parent)?,
            deadline: to_u64(deadline)?,
            proposal_time: to_u64(proposal_time)?,
        })
    }

    async fn is_staked(&self, staker: Address) -> Result<bool> {
        Ok(self.rollup.is_staked(staker).call().await?)
    }

    async fn current_challenge(&self, staker: Address) -> Result<Option<Address>> {
        let (_, _, _, challenge) = pending(self.rollup.stakers(staker)).call().await?;
        Ok((!challenge.is_zero()).then_some(challenge))
    }

    async fn stake(&self, amount: U256) -> Result<H256> {
        send(self.rollup.stake().value(amount), self.gas_price).await
    }

    async fn confirm_first_unresolved_assertion(&self) -> Result<H256> {
        send(self.rollup.confirm_first_unresolved_assertion(), self.gas_price).await
    }

    async fn header_by_number(&self, number: u64) -> Result<Header> {
        let block = self
            .client
            .get_block(BlockNumber::Number(number.into()))
            .await?
            .ok_or(anyhow!("L1 block #{} not found", number))?;
        header_of(&block)
    }

    async fn latest_header(&self) -> Result<Header> {
        let block = self
            .client
            .get_block(BlockNumber::Latest)
            .await?
            .ok_or(anyhow!("L1 node returned no latest block"))?;
        header_of(&block)
    }

    async fn subscribe_assertion_created(&self) -> Result<Subscription<AssertionCreated>> {
        forward_logs::<AssertionCreatedFilter, _>(
            Arc::clone(&self.client),
            self.rollup.assertion_created_filter().filter,
        )
        .await
    }

    async fn subscribe_assertion_confirmed(&self) -> Result<Subscription<AssertionConfirmed>> {
        forward_logs::<AssertionConfirmedFilter, _>(
            Arc::clone(&self.client),
            self.rollup.assertion_confirmed_filter().filter,
        )
        .await
    }

    async fn subscribe_assertion_challenged(&self) -> Result<Subscription<AssertionChallenged>> {
        forward_logs::<AssertionChallengedFilter, _>(
            Arc::clone(&self.client),
            self.rollup.assertion_challenged_filter().filter,
        )
        .await
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>> {
        let client = Arc::clone(&self.client);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (header_tx, header_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let forwarder = tokio::spawn(async move {
            let mut stream = match client.subscribe_blocks().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow!(e)));
                    return;
                }
            };
            while let Some(block) = stream.next().await {
                match header_of(&block) {
                    Ok(header) => {
                        if header_tx.send(header).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "eth-ledger", "Dropping malformed L1 header: {}", e);
                    }
                }
            }
            tracing::debug!(target: "eth-ledger", "L1 header stream closed");
        });

        ready_rx
            .await
            .map_err(|_| anyhow!("Header forwarder exited before subscribing"))??;
        Ok(Subscription::with_forwarder(header_rx, forwarder))
    }

    async fn bind_challenge(&self, address: Address) -> Result<Arc<dyn ChallengeSession>> {
        let code = self.client.get_code(address, None).await?;
        if code.is_empty() {
            bail!("No contract deployed at challenge address {:?}", address);
        }
        Ok(Arc::new(EthChallenge {
            client: Arc::clone(&self.client),
            contract: IChallenge::new(address, Arc::clone(&self.client)),
            gas_price: self.gas_price,
        }))
    }
}

/// The [EthChallenge] is the production [ChallengeSession], backed by a challenge contract.
#[derive(Debug, Clone)]
pub struct EthChallenge {
    client: Arc<SignerMiddlewareWS>,
    contract: IChallenge<SignerMiddlewareWS>,
    gas_price: U256,
}

#[async_trait]
impl ChallengeSession for EthChallenge {
    fn address(&self) -> Address {
        self.contract.address()
    }

    async fn current_responder(&self) -> Result<Address> {
        Ok(pending(self.contract.current_responder()).call().await?)
    }

    async fn current_responder_time_left(&self) -> Result<u64> {
        to_u64(pending(self.contract.current_responder_time_left()).call().await?)
    }

    async fn initialize_challenge_length(
        &self,
        midpoint: Commitment,
        num_steps: u64,
    ) -> Result<H256> {
        send(
            self.contract
                .initialize_challenge_length(midpoint.0, U256::from(num_steps)),
            self.gas_price,
        )
        .await
    }

    async fn bisect_execution(
        &self,
        segment: Segment,
        bisection: [Commitment; 3],
    ) -> Result<H256> {
        send(
            self.contract.bisect_execution(
                bisection.map(|c| c.0),
                U256::from(segment.start),
                U256::from(segment.len()),
            ),
            self.gas_price,
        )
        .await
    }

    async fn verify_one_step_proof(&self, step: u64, proof: Bytes) -> Result<H256> {
        send(
            self.contract.verify_one_step_proof(proof, U256::from(step)),
            self.gas_price,
        )
        .await
    }

    async fn timeout(&self) -> Result<H256> {
        send(self.contract.timeout(), self.gas_price).await
    }

    async fn last_bisected(&self) -> Result<Option<Bisected>> {
        let logs = self
            .contract
            .bisected_filter()
            .from_block(BlockNumber::Earliest)
            .query()
            .await
            .with_context(|| format!("Failed to query Bisected logs of {:?}", self.address()))?;
        logs.into_iter().last().map(Bisected::try_from).transpose()
    }

    async fn subscribe_bisected(&self) -> Result<Subscription<Bisected>> {
        forward_logs::<BisectedFilter, _>(
            Arc::clone(&self.client),
            self.contract.bisected_filter().filter,
        )
        .await
    }

    async fn subscribe_challenge_completed(&self) -> Result<Subscription<ChallengeCompleted>> {
        forward_logs::<ChallengeCompletedFilter, _>(
            Arc::clone(&self.client),
            self.contract.challenge_completed_filter().filter,
        )
        .await
    }
}

/// Points a read call at the pending block.
fn pending<D: Detokenize>(
    call: ContractCall<SignerMiddlewareWS, D>,
) -> ContractCall<SignerMiddlewareWS, D> {
    call.block(BlockNumber::Pending)
}

/// Signs and broadcasts a transaction with the fixed gas price, returning its hash without
/// waiting for inclusion.
async fn send<D: Detokenize>(
    call: ContractCall<SignerMiddlewareWS, D>,
    gas_price: U256,
) -> Result<H256> {
    let call = call.gas_price(gas_price);
    let pending_tx = call.send().await?;
    Ok(pending_tx.tx_hash())
}

/// Extracts a [Header] from an L1 block.
fn header_of<T>(block: &Block<T>) -> Result<Header> {
    Ok(Header {
        number: block
            .number
            .ok_or(anyhow!("L1 block has no number"))?
            .as_u64(),
        timestamp: to_u64(block.timestamp)?,
    })
}

/// Subscribes to the logs matching `filter` and forwards them, decoded as `E` and converted into
/// `T`, to the returned [Subscription]. Logs that fail to decode are dropped.
async fn forward_logs<E, T>(client: Arc<SignerMiddlewareWS>, filter: Filter) -> Result<Subscription<T>>
where
    E: EthLogDecode + Send + 'static,
    T: TryFrom<E, Error = anyhow::Error> + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();
    let (event_tx, event_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

    let forwarder = tokio::spawn(async move {
        let mut stream = match client.subscribe_logs(&filter).await {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = ready_tx.send(Err(anyhow!(e)));
                return;
            }
        };
        while let Some(log) = stream.next().await {
            let raw = RawLog {
                topics: log.topics,
                data: log.data.to_vec(),
            };
            let event = E::decode_log(&raw)
                .map_err(anyhow::Error::from)
                .and_then(T::try_from);
            match event {
                Ok(event) => {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "eth-ledger", "Dropping undecodable log: {}", e);
                }
            }
        }
        tracing::debug!(target: "eth-ledger", "Log stream closed");
    });

    ready_rx
        .await
        .map_err(|_| anyhow!("Log forwarder exited before subscribing"))??;
    Ok(Subscription::with_forwarder(event_rx, forwarder))
}

impl TryFrom<AssertionCreatedFilter> for AssertionCreated {
    type Error = anyhow::Error;

    fn try_from(ev: AssertionCreatedFilter) -> Result<Self> {
        Ok(Self {
            id: to_u64(ev.assertion_id)?,
            asserter: ev.asserter_addr,
            vm_hash: H256::from(ev.vm_hash),
            inbox_size: to_u64(ev.inbox_size)?,
        })
    }
}

impl TryFrom<AssertionConfirmedFilter> for AssertionConfirmed {
    type Error = anyhow::Error;

    fn try_from(ev: AssertionConfirmedFilter) -> Result<Self> {
        Ok(Self {
            id: to_u64(ev.assertion_id)?,
        })
    }
}

impl TryFrom<AssertionChallengedFilter> for AssertionChallenged {
    type Error = anyhow::Error;

    fn try_from(ev: AssertionChallengedFilter) -> Result<Self> {
        Ok(Self {
            id: to_u64(ev.assertion_id)?,
            challenge_address: ev.challenge_addr,
        })
    }
}

impl TryFrom<BisectedFilter> for Bisected {
    type Error = anyhow::Error;

    fn try_from(ev: BisectedFilter) -> Result<Self> {
        let start = to_u64(ev.challenged_segment_start)?;
        let length = to_u64(ev.challenged_segment_length)?;
        Ok(Self {
            start_state: H256::from(ev.start_state),
            mid_state: H256::from(ev.mid_state),
            end_state: H256::from(ev.end_state),
            block_number: to_u64(ev.block_num)?,
            block_time: to_u64(ev.block_time)?,
            segment: Segment::from_start_and_length(start, length)
                .ok_or(anyhow!("Bisected segment overflows: {} + {}", start, length))?,
        })
    }
}

impl TryFrom<ChallengeCompletedFilter> for ChallengeCompleted {
    type Error = anyhow::Error;

    fn try_from(ev: ChallengeCompletedFilter) -> Result<Self> {
        Ok(Self {
            winner: ev.winner,
            loser: ev.loser,
        })
    }
}
