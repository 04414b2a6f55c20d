//! The `ledger` module defines the typed session over the base ledger contracts that the drivers
//! read from, submit transactions to, and subscribe to.

use crate::types::{
    Assertion, AssertionChallenged, AssertionConfirmed, AssertionCreated, Bisected,
    ChallengeCompleted, Header,
};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use fp_defender_solvers::bisection::{Commitment, Segment};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};

/// The number of undelivered events buffered per subscription.
pub const SUBSCRIPTION_BUFFER: usize = 4096;

/// An ordered feed of events from the base ledger. Dropping the [Subscription] unsubscribes it.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
    forwarder: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    /// Creates a [Subscription] reading from `receiver`.
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            receiver,
            forwarder: None,
        }
    }

    /// Creates a [Subscription] reading from `receiver`, which is fed by the `forwarder` task.
    /// The task is aborted when the [Subscription] is dropped.
    pub fn with_forwarder(receiver: mpsc::Receiver<T>, forwarder: JoinHandle<()>) -> Self {
        Self {
            receiver,
            forwarder: Some(forwarder),
        }
    }

    /// Waits for the next event. Returns `None` once the feed has closed.
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Waits for the next event on an optional feed. A feed that failed to subscribe never yields.
pub async fn next_event<T>(feed: &mut Option<Subscription<T>>) -> Option<T> {
    match feed {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// The [RollupLedger] trait is the session over the assertion registry, its assertion map and
/// the L1 chain itself.
#[async_trait]
pub trait RollupLedger: Send + Sync {
    /// Returns the ID of the last confirmed or rejected assertion.
    async fn last_resolved_assertion_id(&self) -> Result<u64>;

    /// Returns the ID of the most recently created assertion.
    async fn last_created_assertion_id(&self) -> Result<u64>;

    /// Fetches the metadata of the assertion with the given ID.
    async fn assertion(&self, id: u64) -> Result<Assertion>;

    /// Returns whether `staker` currently has a stake in the rollup.
    async fn is_staked(&self, staker: Address) -> Result<bool>;

    /// Returns the challenge contract `staker` is currently engaged in, if any.
    async fn current_challenge(&self, staker: Address) -> Result<Option<Address>>;

    /// Submits a staking transaction carrying `amount` wei.
    async fn stake(&self, amount: U256) -> Result<H256>;

    /// Submits a transaction confirming the first unresolved assertion.
    async fn confirm_first_unresolved_assertion(&self) -> Result<H256>;

    /// Fetches the L1 header at the given height.
    async fn header_by_number(&self, number: u64) -> Result<Header>;

    /// Fetches the current L1 tip.
    async fn latest_header(&self) -> Result<Header>;

    /// Subscribes to `AssertionCreated` events.
    async fn subscribe_assertion_created(&self) -> Result<Subscription<AssertionCreated>>;

    /// Subscribes to `AssertionConfirmed` events.
    async fn subscribe_assertion_confirmed(&self) -> Result<Subscription<AssertionConfirmed>>;

    /// Subscribes to `AssertionChallenged` events.
    async fn subscribe_assertion_challenged(&self) -> Result<Subscription<AssertionChallenged>>;

    /// Subscribes to new L1 headers.
    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>>;

    /// Binds a [ChallengeSession] to the challenge contract at `address`.
    async fn bind_challenge(&self, address: Address) -> Result<Arc<dyn ChallengeSession>>;
}

/// The [ChallengeSession] trait is the session over a single challenge contract.
#[async_trait]
pub trait ChallengeSession: Send + Sync {
    /// Returns the address of the challenge contract.
    fn address(&self) -> Address;

    /// Returns the party whose turn it is to act.
    async fn current_responder(&self) -> Result<Address>;

    /// Returns the seconds the current responder has left before it can be timed out.
    async fn current_responder_time_left(&self) -> Result<u64>;

    /// Initializes the challenge with the commitment to the midpoint of the whole trace and the
    /// total number of steps.
    async fn initialize_challenge_length(
        &self,
        midpoint: Commitment,
        num_steps: u64,
    ) -> Result<H256>;

    /// Responds to a bisection with the `[start, mid, end]` commitments of `segment`.
    async fn bisect_execution(
        &self,
        segment: Segment,
        bisection: [Commitment; 3],
    ) -> Result<H256>;

    /// Submits the single-step proof for the step starting at `step`.
    async fn verify_one_step_proof(&self, step: u64, proof: Bytes) -> Result<H256>;

    /// Claims victory over an opponent who ran out of time.
    async fn timeout(&self) -> Result<H256>;

    /// Returns the most recent `Bisected` event already emitted by the contract, if any.
    async fn last_bisected(&self) -> Result<Option<Bisected>>;

    /// Subscribes to `Bisected` events.
    async fn subscribe_bisected(&self) -> Result<Subscription<Bisected>>;

    /// Subscribes to `ChallengeCompleted` events.
    async fn subscribe_challenge_completed(&self) -> Result<Subscription<ChallengeCompleted>>;
}
