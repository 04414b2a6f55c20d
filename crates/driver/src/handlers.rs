//! Event handlers for the confirmation and challenge drivers. Each handler processes exactly one
//! event; the drivers decide which failures end the loop and which are logged and skipped.

use crate::{
    base::BaseService,
    state::ActiveChallenge,
    types::{AssertionChallenged, Bisected, ChallengeContext, Header},
    utils,
};
use anyhow::{Context, Result};
use ethers::types::{Address, H256};
use fp_defender_solvers::bisection::{BisectionGame, Game, Response};

/// The result of checking a new L1 header for a confirmable assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The chain is shorter than the confirmation lag.
    TipTooShallow,
    /// Every created assertion has already been resolved.
    NothingPending,
    /// The first unresolved assertion is still inside its challenge window.
    DeadlineNotReached {
        /// The first unresolved assertion.
        id: u64,
        /// Its confirmation deadline.
        deadline: u64,
    },
    /// A confirmation transaction was submitted.
    Submitted {
        /// The confirmed assertion.
        id: u64,
        /// The confirmation transaction.
        tx: H256,
    },
}

/// Handles a new L1 header while no challenge is active: confirms the first unresolved assertion
/// once the trusted header's timestamp has reached its deadline. Assertions are only ever
/// confirmed in order, one per header.
pub async fn new_header(base: &BaseService, header: Header) -> Result<ConfirmOutcome> {
    let ledger = base.ledger.as_ref();

    let Some(confirmed) =
        utils::confirmed_header(ledger, header, base.config.l1_confirmations).await?
    else {
        return Ok(ConfirmOutcome::TipTooShallow);
    };

    let last_resolved = ledger
        .last_resolved_assertion_id()
        .await
        .context("Failed to get last resolved assertion ID")?;
    let last_created = ledger
        .last_created_assertion_id()
        .await
        .context("Failed to get last created assertion ID")?;
    if last_created <= last_resolved {
        return Ok(ConfirmOutcome::NothingPending);
    }

    tracing::debug!(target: "confirmation-driver", "Checking assertions against L1 block #{} (trusted #{})", header.number, confirmed.number);
    let first_unresolved = last_resolved + 1;
    let assertion = ledger
        .assertion(first_unresolved)
        .await
        .with_context(|| format!("Failed to get first unresolved assertion #{}", first_unresolved))?;

    if confirmed.timestamp < assertion.deadline {
        return Ok(ConfirmOutcome::DeadlineNotReached {
            id: assertion.id,
            deadline: assertion.deadline,
        });
    }

    tracing::info!(target: "confirmation-driver", "Challenge window of assertion #{} has passed, confirming...", first_unresolved);
    let tx = ledger
        .confirm_first_unresolved_assertion()
        .await
        .with_context(|| format!("Failed to confirm assertion #{}", first_unresolved))?;
    Ok(ConfirmOutcome::Submitted {
        id: first_unresolved,
        tx,
    })
}

/// Handles an `AssertionChallenged` event by fetching the challenged assertion and its parent
/// and building the [ChallengeContext] handed to the challenge driver.
pub async fn assertion_challenged(
    base: &BaseService,
    ev: &AssertionChallenged,
) -> Result<ChallengeContext> {
    challenge_context(base, ev.challenge_address, ev.id, false).await
}

/// Rebuilds the [ChallengeContext] of a challenge left open by a previous run from chain state.
/// Returns `None` if our stake address is no longer engaged in a challenge.
pub async fn recover_challenge(base: &BaseService) -> Result<Option<ChallengeContext>> {
    let ledger = base.ledger.as_ref();
    let staker = base.config.stake_address;

    let Some(challenge_address) = ledger
        .current_challenge(staker)
        .await
        .context("Failed to query the current challenge of the stake address")?
    else {
        return Ok(None);
    };

    let last_resolved = ledger
        .last_resolved_assertion_id()
        .await
        .context("Failed to get last resolved assertion ID")?;
    challenge_context(base, challenge_address, last_resolved + 1, true)
        .await
        .map(Some)
}

async fn challenge_context(
    base: &BaseService,
    challenge_address: Address,
    assertion_id: u64,
    resumed: bool,
) -> Result<ChallengeContext> {
    let assertion = base
        .ledger
        .assertion(assertion_id)
        .await
        .with_context(|| format!("Failed to get challenged assertion #{}", assertion_id))?;
    let parent = base
        .ledger
        .assertion(assertion.parent)
        .await
        .with_context(|| format!("Failed to get parent assertion #{}", assertion.parent))?;

    Ok(ChallengeContext {
        challenge_address,
        assertion,
        parent,
        resumed,
    })
}

/// Enters a challenge: binds the challenge contract, subscribes to its events, replays the
/// disputed inbox range and initializes the challenge with our midpoint commitment.
pub async fn setup_challenge(
    base: &BaseService,
    context: ChallengeContext,
) -> Result<ActiveChallenge> {
    let session = base
        .ledger
        .bind_challenge(context.challenge_address)
        .await
        .with_context(|| format!("Failed to access ongoing challenge {:?}", context.challenge_address))?;
    let address = session.address();
    let bisected = session
        .subscribe_bisected()
        .await
        .with_context(|| format!("Failed to watch Bisected events of {:?}", address))?;
    let completed = session
        .subscribe_challenge_completed()
        .await
        .with_context(|| format!("Failed to watch ChallengeCompleted events of {:?}", address))?;

    let (start, end) = context.inbox_range();
    tracing::info!(target: "challenge-driver", "Generating execution states for inbox range [{}, {})...", start, end);
    let states = base
        .oracle
        .generate_states(start, end)
        .await
        .with_context(|| format!("Failed to generate states for inbox range [{}, {})", start, end))?;
    let game = BisectionGame::new(states)?;
    tracing::info!(target: "challenge-driver", "Generated {} steps for challenge {:?}", game.num_steps(), address);

    let midpoint = game.initial_commitment()?;
    match session
        .initialize_challenge_length(midpoint, game.num_steps())
        .await
    {
        Ok(tx) => {
            tracing::info!(target: "challenge-driver", "Initialized challenge {:?} with {} steps. Tx hash: {:?}", address, game.num_steps(), tx);
        }
        Err(e) if context.resumed => {
            tracing::warn!(target: "challenge-driver", "Could not initialize resumed challenge {:?}, assuming it already is: {:?}", address, e);
        }
        Err(e) => return Err(e.context(format!("Failed to initialize challenge {:?}", address))),
    }

    Ok(ActiveChallenge {
        context,
        session,
        game,
        bisected,
        completed,
        opponent_timeout: None,
    })
}

/// The result of handling a `Bisected` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// It was our turn and a response was submitted.
    Responded {
        /// The response transaction.
        tx: H256,
    },
    /// It is the opponent's turn; they can be timed out after `timeout`.
    OpponentTimeoutArmed {
        /// The timestamp after which the opponent forfeits.
        timeout: u64,
    },
}

/// Handles a `Bisected` event. If we are the current responder, narrows the segment with a new
/// bisection or proves the single remaining step. Otherwise arms the opponent timeout.
pub async fn bisected(
    base: &BaseService,
    active: &mut ActiveChallenge,
    ev: Bisected,
) -> Result<TurnOutcome> {
    let responder = active
        .session
        .current_responder()
        .await
        .context("Can not get current responder")?;
    tracing::debug!(target: "challenge-driver", "Bisected at L1 block #{}, offered mid state {:?}. Responder: {:?}, staker: {:?}", ev.block_number, ev.mid_state, responder, base.config.stake_address);

    if responder != base.config.stake_address {
        let time_left = active
            .session
            .current_responder_time_left()
            .await
            .context("Can not get current responder time left")?;
        let timeout = ev.block_time.saturating_add(time_left);
        tracing::info!(target: "challenge-driver", "Opponent to respond on {} by {} (block time {}, {}s left)", ev.segment, timeout, ev.block_time, time_left);
        active.opponent_timeout = Some(timeout);
        return Ok(TurnOutcome::OpponentTimeoutArmed { timeout });
    }

    // Our turn: the opponent is no longer on the clock.
    active.opponent_timeout = None;
    let tx = match active.game.respond(ev.segment)? {
        Response::Bisect { segment, bisection } => {
            if bisection[0] != ev.start_state {
                tracing::warn!(target: "challenge-driver", "Start state of segment {} differs from local trace: {:?} != {:?}", segment, ev.start_state, bisection[0]);
            }
            if bisection[2] != ev.end_state {
                tracing::warn!(target: "challenge-driver", "End state of segment {} differs from local trace: {:?} != {:?}", segment, ev.end_state, bisection[2]);
            }
            tracing::info!(target: "challenge-driver", "Bisecting segment {} at step {}", segment, segment.midpoint());
            active
                .session
                .bisect_execution(segment, bisection)
                .await
                .with_context(|| format!("Can not respond to bisection of {}", segment))?
        }
        Response::OneStepProof { step } => {
            tracing::info!(target: "challenge-driver", "Segment {} narrowed to one step, submitting proof", ev.segment);
            let pre_state = active.game.state_at(step)?;
            let proof = base
                .oracle
                .one_step_proof(pre_state)
                .await
                .with_context(|| format!("Failed to generate one-step proof for step {}", step))?;
            active
                .session
                .verify_one_step_proof(step, proof)
                .await
                .with_context(|| format!("Can not submit one-step proof for step {}", step))?
        }
    };
    Ok(TurnOutcome::Responded { tx })
}

/// Picks a resumed challenge back up from the contract's current turn, since `Bisected` events
/// emitted before the restart are not replayed by the subscription.
///
/// Replays the last `Bisected` event if there is one. Otherwise nobody has bisected yet: an
/// opponent on the clock is given its time left from the current L1 tip.
pub async fn resume_turn(base: &BaseService, active: &mut ActiveChallenge) -> Result<Option<TurnOutcome>> {
    let last = active
        .session
        .last_bisected()
        .await
        .context("Can not fetch the last bisection of the resumed challenge")?;
    if let Some(ev) = last {
        tracing::info!(target: "challenge-driver", "Replaying last bisection of segment {} at block time {}", ev.segment, ev.block_time);
        return bisected(base, active, ev).await.map(Some);
    }

    let responder = active
        .session
        .current_responder()
        .await
        .context("Can not get current responder")?;
    if responder == base.config.stake_address {
        tracing::warn!(target: "challenge-driver", "Resumed challenge has no bisection to respond to yet");
        return Ok(None);
    }

    let time_left = active
        .session
        .current_responder_time_left()
        .await
        .context("Can not get current responder time left")?;
    let tip = base
        .ledger
        .latest_header()
        .await
        .context("Failed to get the latest L1 header")?;
    let timeout = tip.timestamp.saturating_add(time_left);
    tracing::info!(target: "challenge-driver", "Opponent to respond by {} ({}s left at L1 block #{})", timeout, time_left, tip.number);
    active.opponent_timeout = Some(timeout);
    Ok(Some(TurnOutcome::OpponentTimeoutArmed { timeout }))
}

/// Handles a new L1 header during a challenge: claims victory if the opponent's time ran out.
/// Returns the timeout transaction if one was submitted. A failed claim leaves the timeout armed
/// so the next header retries it.
pub async fn challenge_header(active: &mut ActiveChallenge, header: Header) -> Result<Option<H256>> {
    let Some(timeout) = active.opponent_timeout else {
        return Ok(None);
    };
    if header.timestamp <= timeout {
        return Ok(None);
    }

    tracing::info!(target: "challenge-driver", "Opponent timed out at {} (header #{} at {}), claiming...", timeout, header.number, header.timestamp);
    let tx = active
        .session
        .timeout()
        .await
        .context("Can not timeout opponent")?;
    active.opponent_timeout = None;
    Ok(Some(tx))
}
