//! The `drivers` module contains implementations of the [Driver] trait.

use crate::{
    base::BaseService,
    handlers::{self, ConfirmOutcome},
    ledger::{next_event, Subscription},
    state::{ActiveChallenge, ChallengeState, ConfirmationState},
    types::{ChallengeContext, Header},
    utils, Driver,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::{ops::ControlFlow, sync::Arc};
use tokio::sync::{mpsc, watch};

/// Defines a new [Driver] implementation holding the shared [BaseService] plus the given fields.
macro_rules! define_driver {
    ($name:ident { $($field:ident: $ty:ty),* $(,)? }, $inner:expr) => {
        #[doc = concat!("Variant of the [Driver] trait: [", stringify!($name), "]")]
        pub struct $name {
            /// The runtime shared between all of the drivers.
            pub base: Arc<BaseService>,
            $($field: $ty,)*
        }

        #[async_trait]
        impl Driver for $name {
            async fn start_loop(self) -> Result<()> {
                #[allow(clippy::redundant_closure_call)]
                $inner(self).await
            }
        }

        impl $name {
            #[doc = concat!("Creates a new instance of the [", stringify!($name), "] driver.")]
            pub fn new(base: Arc<BaseService>, $($field: $ty),*) -> Self {
                Self { base, $($field),* }
            }
        }
    };
}

/// Turns the result of opening a feed into an optional feed. A failed subscription is logged
/// under `$target` and the loop carries on without it.
macro_rules! feed_or_log {
    ($target:literal, $feed:literal, $opened:expr) => {
        match $opened {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::error!(target: $target, "Failed to subscribe to {}, continuing without it: {:?}", $feed, e);
                None
            }
        }
    };
}

/// Drops a feed whose stream has ended so the loop stops polling it.
macro_rules! close_feed {
    ($target:literal, $feed:expr, $name:literal) => {{
        tracing::warn!(target: $target, "{} feed closed", $name);
        *$feed = None;
    }};
}

define_driver!(
    ConfirmationDriver {
        challenge_tx: mpsc::Sender<ChallengeContext>,
        resolved_rx: mpsc::Receiver<()>,
        initial_state: ConfirmationState,
    },
    (|driver: ConfirmationDriver| driver.run())
);

define_driver!(
    ChallengeDriver {
        challenge_rx: mpsc::Receiver<ChallengeContext>,
        resolved_tx: mpsc::Sender<()>,
        recover: bool,
    },
    (|driver: ChallengeDriver| driver.run())
);

impl ConfirmationDriver {
    async fn run(mut self) -> Result<()> {
        let ledger = Arc::clone(&self.base.ledger);
        tracing::info!(target: "confirmation-driver", "Subscribing to rollup events and L1 headers...");
        let mut created = feed_or_log!(
            "confirmation-driver",
            "AssertionCreated",
            ledger.subscribe_assertion_created().await
        );
        let mut confirmed = feed_or_log!(
            "confirmation-driver",
            "AssertionConfirmed",
            ledger.subscribe_assertion_confirmed().await
        );
        let mut challenged = feed_or_log!(
            "confirmation-driver",
            "AssertionChallenged",
            ledger.subscribe_assertion_challenged().await
        );
        let mut heads = feed_or_log!(
            "confirmation-driver",
            "L1 headers",
            ledger.subscribe_new_heads().await
        );

        let mut lifetime = self.base.lifetime();
        let mut state = self.initial_state;
        tracing::info!(target: "confirmation-driver", "Beginning confirmation loop in {:?} state.", state);

        loop {
            match state {
                ConfirmationState::ChallengeActive => {
                    tokio::select! {
                        resolved = self.resolved_rx.recv() => {
                            if resolved.is_none() {
                                tracing::warn!(target: "confirmation-driver", "Challenge driver hung up, exiting.");
                                return Ok(());
                            }
                            tracing::info!(target: "confirmation-driver", "Challenge finished, resetting inChallenge status.");
                            state = ConfirmationState::Idle;
                            utils::persist_in_challenge(self.base.store.as_ref(), state.in_challenge()).await;
                        }
                        _ = utils::cancelled(&mut lifetime) => return Ok(()),
                    }
                }
                ConfirmationState::Idle => {
                    tokio::select! {
                        ev = next_event(&mut created) => match ev {
                            Some(ev) => {
                                tracing::info!(target: "confirmation-driver", "New assertion #{} by {:?}, vm hash {:?}, inbox size {}", ev.id, ev.asserter, ev.vm_hash, ev.inbox_size);
                            }
                            None => close_feed!("confirmation-driver", &mut created, "AssertionCreated"),
                        },
                        ev = next_event(&mut confirmed) => match ev {
                            Some(ev) => {
                                tracing::info!(target: "confirmation-driver", "Assertion #{} confirmed", ev.id);
                            }
                            None => close_feed!("confirmation-driver", &mut confirmed, "AssertionConfirmed"),
                        },
                        header = next_event(&mut heads) => match header {
                            Some(header) => self.on_header(header).await,
                            None => close_feed!("confirmation-driver", &mut heads, "L1 headers"),
                        },
                        ev = next_event(&mut challenged) => match ev {
                            Some(ev) => {
                                tracing::warn!(target: "confirmation-driver", "Assertion #{} challenged by {:?}!", ev.id, ev.challenge_address);
                                let context = handlers::assertion_challenged(&self.base, &ev).await?;
                                tokio::select! {
                                    sent = self.challenge_tx.send(context) => {
                                        sent.map_err(|_| anyhow!("Challenge driver is not running"))?;
                                    }
                                    _ = utils::cancelled(&mut lifetime) => return Ok(()),
                                }
                                state = ConfirmationState::ChallengeActive;
                                utils::persist_in_challenge(self.base.store.as_ref(), state.in_challenge()).await;
                            }
                            None => close_feed!("confirmation-driver", &mut challenged, "AssertionChallenged"),
                        },
                        _ = utils::cancelled(&mut lifetime) => return Ok(()),
                    }
                }
            }
        }
    }

    async fn on_header(&self, header: Header) {
        match handlers::new_header(&self.base, header).await {
            Ok(ConfirmOutcome::Submitted { id, tx }) => {
                tracing::info!(target: "confirmation-driver", "Confirmation of assertion #{} sent. Tx hash: {:?}", id, tx);
            }
            Ok(outcome) => {
                tracing::trace!(target: "confirmation-driver", "L1 block #{}: {:?}", header.number, outcome);
            }
            Err(e) => {
                // Soft failure, the next header retries.
                tracing::error!(target: "confirmation-driver", "Skipping L1 block #{}: {:?}", header.number, e);
            }
        }
    }
}

impl ChallengeDriver {
    async fn run(mut self) -> Result<()> {
        let mut heads = feed_or_log!(
            "challenge-driver",
            "L1 headers",
            self.base.ledger.subscribe_new_heads().await
        );
        let mut lifetime = self.base.lifetime();
        let mut state = ChallengeState::Idle;

        if self.recover {
            tracing::warn!(target: "challenge-driver", "A challenge was in progress before restart, recovering from chain state...");
            match handlers::recover_challenge(&self.base).await? {
                Some(context) => {
                    let mut active = handlers::setup_challenge(&self.base, context).await?;
                    match handlers::resume_turn(&self.base, &mut active).await {
                        Ok(outcome) => {
                            tracing::info!(target: "challenge-driver", "Resumed challenge {:?}: {:?}", active.context.challenge_address, outcome);
                        }
                        Err(e) => {
                            // Soft failure, the next bisection event or header picks the turn up.
                            tracing::error!(target: "challenge-driver", "Can not resume turn in challenge {:?}: {:?}", active.context.challenge_address, e);
                        }
                    }
                    state = ChallengeState::InChallenge(Box::new(active));
                }
                None => {
                    tracing::info!(target: "challenge-driver", "No challenge open on chain anymore, releasing confirmations.");
                    if !self.signal_resolved(&mut lifetime).await? {
                        return Ok(());
                    }
                }
            }
        }

        tracing::info!(target: "challenge-driver", "Beginning challenge loop.");
        loop {
            let next = match state {
                ChallengeState::Idle => self.wait_for_challenge(&mut heads, &mut lifetime).await?,
                ChallengeState::InChallenge(active) => {
                    self.play(active, &mut heads, &mut lifetime).await?
                }
            };
            match next {
                ControlFlow::Continue(next) => state = next,
                ControlFlow::Break(()) => return Ok(()),
            }
        }
    }

    /// Waits in [ChallengeState::Idle] for the confirmation driver to hand over a challenge.
    async fn wait_for_challenge(
        &mut self,
        heads: &mut Option<Subscription<Header>>,
        lifetime: &mut watch::Receiver<bool>,
    ) -> Result<ControlFlow<(), ChallengeState>> {
        tokio::select! {
            context = self.challenge_rx.recv() => {
                let Some(context) = context else {
                    tracing::warn!(target: "challenge-driver", "Confirmation driver hung up, exiting.");
                    return Ok(ControlFlow::Break(()));
                };
                tracing::warn!(target: "challenge-driver", "Received challenge {:?} against assertion #{}", context.challenge_address, context.assertion.id);
                tokio::select! {
                    active = handlers::setup_challenge(&self.base, context) => {
                        Ok(ControlFlow::Continue(ChallengeState::InChallenge(Box::new(active?))))
                    }
                    _ = utils::cancelled(lifetime) => Ok(ControlFlow::Break(())),
                }
            }
            header = next_event(heads) => {
                // Nothing to time out while idle; drain the feed.
                if header.is_none() {
                    close_feed!("challenge-driver", heads, "L1 headers");
                }
                Ok(ControlFlow::Continue(ChallengeState::Idle))
            }
            _ = utils::cancelled(lifetime) => Ok(ControlFlow::Break(())),
        }
    }

    /// Services one event of the challenge in progress.
    async fn play(
        &self,
        mut active: Box<ActiveChallenge>,
        heads: &mut Option<Subscription<Header>>,
        lifetime: &mut watch::Receiver<bool>,
    ) -> Result<ControlFlow<(), ChallengeState>> {
        let address = active.context.challenge_address;
        tokio::select! {
            ev = active.bisected.next() => {
                let ev = ev.ok_or(anyhow!("Bisected feed of challenge {:?} closed", address))?;
                tracing::debug!(target: "challenge-driver", "Bisected event received for segment {}", ev.segment);
                match handlers::bisected(&self.base, &mut active, ev).await {
                    Ok(outcome) => {
                        tracing::debug!(target: "challenge-driver", "Bisection handled: {:?}", outcome);
                    }
                    Err(e) => {
                        // Soft failure, the turn is retried on the next bisection event.
                        tracing::error!(target: "challenge-driver", "Can not act on bisection in challenge {:?}: {:?}", address, e);
                    }
                }
            }
            header = next_event(heads) => match header {
                Some(header) => match handlers::challenge_header(&mut active, header).await {
                    Ok(Some(tx)) => {
                        tracing::info!(target: "challenge-driver", "Timeout claimed in challenge {:?}. Tx hash: {:?}", address, tx);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // Soft failure, the timeout stays armed for the next header.
                        tracing::error!(target: "challenge-driver", "{:?}", e);
                    }
                },
                None => close_feed!("challenge-driver", heads, "L1 headers"),
            },
            ev = active.completed.next() => {
                let ev = ev.ok_or(anyhow!("ChallengeCompleted feed of challenge {:?} closed", address))?;
                tracing::info!(target: "challenge-driver", "Challenge {:?} completed, winner: {:?}, loser: {:?}", address, ev.winner, ev.loser);
                if ev.winner != self.base.config.stake_address {
                    tracing::error!(target: "challenge-driver", "Lost challenge {:?} over assertion #{} to {:?}", address, active.context.assertion.id, ev.winner);
                }
                // Unsubscribes from the challenge and frees the trace.
                drop(active);
                let next = if self.signal_resolved(lifetime).await? {
                    ControlFlow::Continue(ChallengeState::Idle)
                } else {
                    ControlFlow::Break(())
                };
                return Ok(next);
            }
            _ = utils::cancelled(lifetime) => return Ok(ControlFlow::Break(())),
        }
        Ok(ControlFlow::Continue(ChallengeState::InChallenge(active)))
    }

    /// Hands control back to the confirmation driver. Returns `false` if the service stopped
    /// first.
    async fn signal_resolved(&self, lifetime: &mut watch::Receiver<bool>) -> Result<bool> {
        tokio::select! {
            sent = self.resolved_tx.send(()) => {
                sent.map_err(|_| anyhow!("Confirmation driver is not running"))?;
                Ok(true)
            }
            _ = utils::cancelled(lifetime) => Ok(false),
        }
    }
}
