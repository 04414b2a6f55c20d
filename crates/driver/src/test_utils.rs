//! In-memory collaborators for driving the handlers and drivers in tests.

use crate::{
    base::BaseService,
    ledger::{ChallengeSession, RollupLedger, Subscription, SUBSCRIPTION_BUFFER},
    oracle::{L2Block, TraceOracle},
    store::StateStore,
    types::{
        Assertion, AssertionChallenged, AssertionConfirmed, AssertionCreated, Bisected,
        ChallengeCompleted, Header,
    },
    DriverConfig,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use fp_defender_solvers::bisection::{Commitment, ExecutionState, Segment};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;

/// Our stake address.
pub const OURS: Address = Address::repeat_byte(0x01);
/// The opponent's stake address.
pub const THEIRS: Address = Address::repeat_byte(0x02);
/// The address of the mock challenge contract.
pub const CHALLENGE: Address = Address::repeat_byte(0xcc);

/// A transaction submitted to one of the mock contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Stake(U256),
    Confirm(u64),
    Initialize { midpoint: Commitment, num_steps: u64 },
    Bisect { segment: Segment, bisection: [Commitment; 3] },
    OneStepProof { step: u64, proof: Bytes },
    Timeout,
}

/// A collaborator call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    LastResolved,
    Assertion,
    Confirm,
    Stake,
    CurrentChallenge,
    SubscribeCreated,
    SubscribeBisected,
    Bind,
    Responder,
    Respond,
    Initialize,
    Timeout,
    GenerateStates,
}

type Faults = Arc<Mutex<HashSet<Fault>>>;
type Submissions = Arc<Mutex<Vec<Submission>>>;

fn check(faults: &Faults, fault: Fault) -> Result<()> {
    if faults.lock().unwrap().contains(&fault) {
        bail!("injected {:?} failure", fault);
    }
    Ok(())
}

/// A single-subscriber feed. Events emitted before anyone subscribes are buffered; subscribing
/// again replaces the previous subscriber.
struct Feed<T> {
    channel: Mutex<(mpsc::Sender<T>, Option<mpsc::Receiver<T>>)>,
}

impl<T> Feed<T> {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        Self {
            channel: Mutex::new((tx, Some(rx))),
        }
    }

    fn subscribe(&self) -> Subscription<T> {
        let mut channel = self.channel.lock().unwrap();
        let receiver = channel.1.take().unwrap_or_else(|| {
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            channel.0 = tx;
            rx
        });
        Subscription::new(receiver)
    }

    fn emit(&self, event: T) {
        let _ = self.channel.lock().unwrap().0.try_send(event);
    }
}

#[derive(Default)]
struct Chain {
    last_resolved: u64,
    last_created: u64,
    assertions: HashMap<u64, Assertion>,
    headers: HashMap<u64, Header>,
    staked: bool,
    current_challenge: Option<Address>,
}

/// An in-memory rollup: confirming an assertion advances the last resolved ID.
pub struct MockLedger {
    chain: Mutex<Chain>,
    submissions: Submissions,
    faults: Faults,
    created: Feed<AssertionCreated>,
    confirmed: Feed<AssertionConfirmed>,
    challenged: Feed<AssertionChallenged>,
    heads: Mutex<Vec<mpsc::Sender<Header>>>,
    pub challenge: Arc<MockChallenge>,
}

impl MockLedger {
    pub fn new() -> Self {
        let submissions = Submissions::default();
        let faults = Faults::default();
        Self {
            chain: Mutex::new(Chain::default()),
            challenge: Arc::new(MockChallenge::new(
                Arc::clone(&submissions),
                Arc::clone(&faults),
            )),
            submissions,
            faults,
            created: Feed::new(),
            confirmed: Feed::new(),
            challenged: Feed::new(),
            heads: Mutex::new(Vec::new()),
        }
    }

    /// Adds an assertion and bumps the last created ID if needed.
    pub fn insert_assertion(&self, assertion: Assertion) {
        let mut chain = self.chain.lock().unwrap();
        chain.last_created = chain.last_created.max(assertion.id);
        chain.assertions.insert(assertion.id, assertion);
    }

    pub fn insert_header(&self, header: Header) {
        self.chain
            .lock()
            .unwrap()
            .headers
            .insert(header.number, header);
    }

    pub fn set_last_resolved(&self, id: u64) {
        self.chain.lock().unwrap().last_resolved = id;
    }

    pub fn last_resolved(&self) -> u64 {
        self.chain.lock().unwrap().last_resolved
    }

    pub fn set_staked(&self, staked: bool) {
        self.chain.lock().unwrap().staked = staked;
    }

    pub fn set_current_challenge(&self, challenge: Option<Address>) {
        self.chain.lock().unwrap().current_challenge = challenge;
    }

    pub fn fail(&self, fault: Fault) {
        self.faults.lock().unwrap().insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        self.faults.lock().unwrap().remove(&fault);
    }

    /// Every transaction submitted so far, across the rollup and the challenge.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Submission) -> bool) -> usize {
        self.submissions().iter().filter(|s| matches(s)).count()
    }

    pub fn head_subscribers(&self) -> usize {
        self.heads.lock().unwrap().len()
    }

    pub fn emit_header(&self, header: Header) {
        self.insert_header(header);
        for subscriber in self.heads.lock().unwrap().iter() {
            let _ = subscriber.try_send(header);
        }
    }

    pub fn emit_challenged(&self, ev: AssertionChallenged) {
        self.challenged.emit(ev);
    }

    pub fn emit_created(&self, ev: AssertionCreated) {
        self.created.emit(ev);
    }
}

#[async_trait]
impl RollupLedger for MockLedger {
    async fn last_resolved_assertion_id(&self) -> Result<u64> {
        check(&self.faults, Fault::LastResolved)?;
        Ok(self.chain.lock().unwrap().last_resolved)
    }

    async fn last_created_assertion_id(&self) -> Result<u64> {
        Ok(self.chain.lock().unwrap().last_created)
    }

    async fn assertion(&self, id: u64) -> Result<Assertion> {
        check(&self.faults, Fault::Assertion)?;
        self.chain
            .lock()
            .unwrap()
            .assertions
            .get(&id)
            .cloned()
            .ok_or(anyhow!("no assertion #{}", id))
    }

    async fn is_staked(&self, _staker: Address) -> Result<bool> {
        Ok(self.chain.lock().unwrap().staked)
    }

    async fn current_challenge(&self, _staker: Address) -> Result<Option<Address>> {
        check(&self.faults, Fault::CurrentChallenge)?;
        Ok(self.chain.lock().unwrap().current_challenge)
    }

    async fn stake(&self, amount: U256) -> Result<H256> {
        check(&self.faults, Fault::Stake)?;
        self.chain.lock().unwrap().staked = true;
        self.submissions
            .lock()
            .unwrap()
            .push(Submission::Stake(amount));
        Ok(H256::random())
    }

    async fn confirm_first_unresolved_assertion(&self) -> Result<H256> {
        check(&self.faults, Fault::Confirm)?;
        let id = {
            let mut chain = self.chain.lock().unwrap();
            chain.last_resolved += 1;
            chain.last_resolved
        };
        self.submissions
            .lock()
            .unwrap()
            .push(Submission::Confirm(id));
        Ok(H256::random())
    }

    async fn header_by_number(&self, number: u64) -> Result<Header> {
        self.chain
            .lock()
            .unwrap()
            .headers
            .get(&number)
            .copied()
            .ok_or(anyhow!("no header #{}", number))
    }

    async fn latest_header(&self) -> Result<Header> {
        self.chain
            .lock()
            .unwrap()
            .headers
            .values()
            .max_by_key(|header| header.number)
            .copied()
            .ok_or(anyhow!("no headers"))
    }

    async fn subscribe_assertion_created(&self) -> Result<Subscription<AssertionCreated>> {
        check(&self.faults, Fault::SubscribeCreated)?;
        Ok(self.created.subscribe())
    }

    async fn subscribe_assertion_confirmed(&self) -> Result<Subscription<AssertionConfirmed>> {
        Ok(self.confirmed.subscribe())
    }

    async fn subscribe_assertion_challenged(&self) -> Result<Subscription<AssertionChallenged>> {
        Ok(self.challenged.subscribe())
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.heads.lock().unwrap().push(tx);
        Ok(Subscription::new(rx))
    }

    async fn bind_challenge(&self, address: Address) -> Result<Arc<dyn ChallengeSession>> {
        check(&self.faults, Fault::Bind)?;
        if address != self.challenge.address {
            bail!("no challenge at {:?}", address);
        }
        Ok(Arc::clone(&self.challenge) as Arc<dyn ChallengeSession>)
    }
}

/// An in-memory challenge contract. The responder and its time left are set by the test.
pub struct MockChallenge {
    pub address: Address,
    responder: Mutex<Address>,
    time_left: Mutex<u64>,
    last_bisected: Mutex<Option<Bisected>>,
    submissions: Submissions,
    faults: Faults,
    bisected: Feed<Bisected>,
    completed: Feed<ChallengeCompleted>,
}

impl MockChallenge {
    fn new(submissions: Submissions, faults: Faults) -> Self {
        Self {
            address: CHALLENGE,
            responder: Mutex::new(OURS),
            time_left: Mutex::new(0),
            last_bisected: Mutex::new(None),
            submissions,
            faults,
            bisected: Feed::new(),
            completed: Feed::new(),
        }
    }

    pub fn set_responder(&self, responder: Address) {
        *self.responder.lock().unwrap() = responder;
    }

    pub fn set_time_left(&self, time_left: u64) {
        *self.time_left.lock().unwrap() = time_left;
    }

    /// Records `ev` as already emitted before anyone subscribed, as seen after a restart.
    pub fn set_last_bisected(&self, ev: Bisected) {
        *self.last_bisected.lock().unwrap() = Some(ev);
    }

    pub fn emit_bisected(&self, ev: Bisected) {
        self.bisected.emit(ev);
    }

    pub fn emit_completed(&self, winner: Address) {
        let loser = if winner == OURS { THEIRS } else { OURS };
        self.completed.emit(ChallengeCompleted { winner, loser });
    }

    fn submit(&self, submission: Submission) -> Result<H256> {
        self.submissions.lock().unwrap().push(submission);
        Ok(H256::random())
    }
}

#[async_trait]
impl ChallengeSession for MockChallenge {
    fn address(&self) -> Address {
        self.address
    }

    async fn current_responder(&self) -> Result<Address> {
        check(&self.faults, Fault::Responder)?;
        Ok(*self.responder.lock().unwrap())
    }

    async fn current_responder_time_left(&self) -> Result<u64> {
        Ok(*self.time_left.lock().unwrap())
    }

    async fn initialize_challenge_length(
        &self,
        midpoint: Commitment,
        num_steps: u64,
    ) -> Result<H256> {
        check(&self.faults, Fault::Initialize)?;
        self.submit(Submission::Initialize {
            midpoint,
            num_steps,
        })
    }

    async fn bisect_execution(
        &self,
        segment: Segment,
        bisection: [Commitment; 3],
    ) -> Result<H256> {
        check(&self.faults, Fault::Respond)?;
        self.submit(Submission::Bisect { segment, bisection })
    }

    async fn verify_one_step_proof(&self, step: u64, proof: Bytes) -> Result<H256> {
        check(&self.faults, Fault::Respond)?;
        self.submit(Submission::OneStepProof { step, proof })
    }

    async fn timeout(&self) -> Result<H256> {
        check(&self.faults, Fault::Timeout)?;
        self.submit(Submission::Timeout)
    }

    async fn last_bisected(&self) -> Result<Option<Bisected>> {
        Ok(self.last_bisected.lock().unwrap().clone())
    }

    async fn subscribe_bisected(&self) -> Result<Subscription<Bisected>> {
        check(&self.faults, Fault::SubscribeBisected)?;
        Ok(self.bisected.subscribe())
    }

    async fn subscribe_challenge_completed(&self) -> Result<Subscription<ChallengeCompleted>> {
        Ok(self.completed.subscribe())
    }
}

/// A trace oracle serving a fixed trace.
pub struct MockOracle {
    states: Vec<ExecutionState>,
    requests: Mutex<Vec<(u64, u64)>>,
    faults: Faults,
}

impl MockOracle {
    pub fn new(states: Vec<ExecutionState>) -> Self {
        Self {
            states,
            requests: Mutex::new(Vec::new()),
            faults: Faults::default(),
        }
    }

    pub fn fail(&self, fault: Fault) {
        self.faults.lock().unwrap().insert(fault);
    }

    /// The inbox ranges traces were requested for.
    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TraceOracle for MockOracle {
    async fn current_block(&self) -> Result<L2Block> {
        Ok(L2Block {
            number: 0,
            hash: H256::repeat_byte(0x0a),
            state_root: H256::repeat_byte(0x0b),
        })
    }

    async fn generate_states(&self, start: u64, end: u64) -> Result<Vec<ExecutionState>> {
        check(&self.faults, Fault::GenerateStates)?;
        self.requests.lock().unwrap().push((start, end));
        Ok(self.states.clone())
    }

    async fn one_step_proof(&self, pre_state: &ExecutionState) -> Result<Bytes> {
        Ok(Bytes::from(pre_state.step_index.to_be_bytes().to_vec()))
    }
}

/// A [StateStore] that keeps the flag in memory and records every write.
#[derive(Default)]
pub struct MemoryStore {
    writes: Mutex<Vec<bool>>,
    initial: bool,
}

impl MemoryStore {
    /// A store as left behind by a previous run that stopped with the flag set to `initial`.
    pub fn with_flag(initial: bool) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            initial,
        }
    }

    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }

    pub fn flag(&self) -> bool {
        self.writes().last().copied().unwrap_or(self.initial)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read_in_challenge(&self) -> Result<bool> {
        Ok(self.flag())
    }

    async fn write_in_challenge(&self, in_challenge: bool) -> Result<()> {
        self.writes.lock().unwrap().push(in_challenge);
        Ok(())
    }
}

/// A trace of `len` distinct states.
pub fn trace(len: u64) -> Vec<ExecutionState> {
    (0..len)
        .map(|i| ExecutionState {
            block_number: 1 + i / 8,
            transaction_index: i % 8,
            step_index: i,
            vm_hash: H256::from_low_u64_be(0x1000 + i),
        })
        .collect()
}

pub fn assertion(id: u64, parent: u64, inbox_size: u64, deadline: u64) -> Assertion {
    Assertion {
        id,
        state_hash: H256::from_low_u64_be(id),
        inbox_size,
        parent,
        deadline,
        proposal_time: deadline.saturating_sub(100),
    }
}

pub fn config() -> DriverConfig {
    DriverConfig::new(
        "ws://localhost:8546".to_string(),
        "http://localhost:8545".to_string(),
        Address::repeat_byte(0xaa),
        OURS,
        U256::from(1_000u64),
    )
}

pub fn base_service(
    config: DriverConfig,
    ledger: &Arc<MockLedger>,
    oracle: &Arc<MockOracle>,
    store: &Arc<MemoryStore>,
) -> Arc<BaseService> {
    Arc::new(BaseService::new(
        config,
        Arc::clone(ledger) as Arc<dyn RollupLedger>,
        Arc::clone(oracle) as Arc<dyn TraceOracle>,
        Arc::clone(store) as Arc<dyn StateStore>,
    ))
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {}", what);
}
