use crate::{
    ledger::RollupLedger,
    store::StateStore,
    types::Header,
};
use anyhow::{Context, Result};
use tokio::sync::watch;

/// Resolves the header whose timestamp is trusted for confirmations.
///
/// # Arguments
/// * `ledger` - The ledger used to fetch the lagging header.
/// * `tip` - The newly observed L1 header.
/// * `l1_confirmations` - How many blocks behind the tip the trusted header lies. `0` trusts the
///   tip itself.
///
/// # Returns
/// * `Ok(None)` if the chain is shorter than the lag, the trusted [Header] otherwise.
pub async fn confirmed_header(
    ledger: &dyn RollupLedger,
    tip: Header,
    l1_confirmations: u64,
) -> Result<Option<Header>> {
    if l1_confirmations == 0 {
        return Ok(Some(tip));
    }
    let Some(number) = tip.number.checked_sub(l1_confirmations) else {
        return Ok(None);
    };
    let header = ledger
        .header_by_number(number)
        .await
        .with_context(|| format!("Failed to get confirmed header #{}", number))?;
    Ok(Some(header))
}

/// Writes the crash-recovery flag. A failed write is logged; the caller's state machine moves on
/// regardless.
pub async fn persist_in_challenge(store: &dyn StateStore, in_challenge: bool) {
    match store.write_in_challenge(in_challenge).await {
        Ok(()) => {
            tracing::debug!(target: "state-store", "Persisted inChallenge = {}", in_challenge);
        }
        Err(e) => {
            tracing::error!(target: "state-store", "Failed to persist inChallenge = {}: {:?}", in_challenge, e);
        }
    }
}

/// Resolves once the lifetime signal has fired or its sender is gone.
pub async fn cancelled(lifetime: &mut watch::Receiver<bool>) {
    let _ = lifetime.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod test {
    use super::confirmed_header;
    use crate::{test_utils::MockLedger, types::Header};

    #[tokio::test]
    async fn no_lag_trusts_tip() {
        let ledger = MockLedger::new();
        let tip = Header {
            number: 10,
            timestamp: 1_000,
        };
        assert_eq!(confirmed_header(&ledger, tip, 0).await.unwrap(), Some(tip));
    }

    #[tokio::test]
    async fn lag_fetches_older_header() {
        let ledger = MockLedger::new();
        ledger.insert_header(Header {
            number: 7,
            timestamp: 940,
        });
        let tip = Header {
            number: 10,
            timestamp: 1_000,
        };
        let header = confirmed_header(&ledger, tip, 3).await.unwrap().unwrap();
        assert_eq!(header.number, 7);
        assert_eq!(header.timestamp, 940);
    }

    #[tokio::test]
    async fn lag_longer_than_chain() {
        let ledger = MockLedger::new();
        let tip = Header {
            number: 2,
            timestamp: 1_000,
        };
        assert_eq!(confirmed_header(&ledger, tip, 3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_lagging_header_is_error() {
        let ledger = MockLedger::new();
        let tip = Header {
            number: 10,
            timestamp: 1_000,
        };
        assert!(confirmed_header(&ledger, tip, 3).await.is_err());
    }
}
