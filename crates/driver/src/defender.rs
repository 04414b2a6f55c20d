//! The `defender` module wires the confirmation and challenge drivers together.

use crate::{
    base::BaseService,
    drivers::{ChallengeDriver, ConfirmationDriver},
    oracle::L2Block,
    state::ConfirmationState,
    Driver,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The [Defender] runs the confirmation driver and the challenge driver side by side. The two
/// only communicate through the challenge hand-off channels: the confirmation driver passes each
/// raised challenge over, then waits for the challenge driver to report it resolved.
pub struct Defender {
    base: Arc<BaseService>,
}

impl Defender {
    /// Creates a new [Defender] over the given [BaseService].
    pub fn new(base: Arc<BaseService>) -> Self {
        Self { base }
    }

    /// Runs the startup checks, restores the crash-recovery flag and spawns both drivers.
    /// Returns the local L2 head.
    pub async fn start(&self, clean_l1: bool, stake: bool) -> Result<L2Block> {
        let genesis = self.base.start(clean_l1, stake).await?;

        let in_challenge = self
            .base
            .store
            .read_in_challenge()
            .await
            .context("Failed to read the crash-recovery flag")?;
        if in_challenge {
            tracing::warn!(target: "base-service", "Previous run stopped during a challenge.");
        }

        let (challenge_tx, challenge_rx) = mpsc::channel(1);
        let (resolved_tx, resolved_rx) = mpsc::channel(1);

        let confirmation = ConfirmationDriver::new(
            Arc::clone(&self.base),
            challenge_tx,
            resolved_rx,
            ConfirmationState::from_flag(in_challenge),
        );
        let challenge = ChallengeDriver::new(
            Arc::clone(&self.base),
            challenge_rx,
            resolved_tx,
            in_challenge,
        );
        self.base.spawn_worker(confirmation.start_loop()).await;
        self.base.spawn_worker(challenge.start_loop()).await;

        tracing::info!(target: "base-service", "fraud-proof defender started");
        Ok(genesis)
    }

    /// Waits until one of the drivers exits and returns its result.
    pub async fn wait(&self) -> Result<()> {
        self.base.join_next_worker().await.unwrap_or(Ok(()))
    }

    /// Stops both drivers and waits for them to exit.
    pub async fn stop(&self) -> Result<()> {
        let result = self.base.stop().await;
        tracing::info!(target: "base-service", "fraud-proof defender stopped");
        result
    }
}
