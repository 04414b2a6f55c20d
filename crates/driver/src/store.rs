//! The `store` module persists the crash-recovery flag recording whether a challenge was open
//! when the defender last observed the chain.

use crate::state::PersistedState;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::io::AsyncWriteExt;

/// The [StateStore] trait defines the key-value collaborator holding the `inChallenge` flag.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the flag. A missing entry reads as `false`.
    async fn read_in_challenge(&self) -> Result<bool>;

    /// Writes the flag.
    async fn write_in_challenge(&self, in_challenge: bool) -> Result<()>;
}

/// A [StateStore] backed by a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a new [JsonFileStore] persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn read_in_challenge(&self) -> Result<bool> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => {
                let state: PersistedState = serde_json::from_slice(&raw)
                    .with_context(|| format!("Corrupt state file {}", self.path.display()))?;
                Ok(state.in_challenge)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn write_in_challenge(&self, in_challenge: bool) -> Result<()> {
        let raw = serde_json::to_vec_pretty(&PersistedState { in_challenge })?;
        // Write to a sibling file and rename so a crash never leaves a torn document behind.
        let staging = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&staging)
            .await
            .with_context(|| format!("Failed to create {}", staging.display()))?;
        file.write_all(&raw)
            .await
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync {}", staging.display()))?;
        drop(file);
        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("Failed to move state into {}", self.path.display()))?;
        Ok(())
    }
}

/// The key the flag is stored under in the [PostgresStore].
const IN_CHALLENGE_KEY: &str = "in_challenge";

/// A [StateStore] backed by a single row in a Postgres table.
pub struct PostgresStore {
    client: Arc<Mutex<postgres::Client>>,
}

impl PostgresStore {
    /// Connects to the database at `url` and creates the state table if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = url.to_owned();
        let client = tokio::task::spawn_blocking(move || -> Result<postgres::Client> {
            let mut client = postgres::Client::connect(&url, postgres::NoTls)
                .context("Failed to connect to state database")?;
            client.batch_execute(
                "CREATE TABLE IF NOT EXISTS fp_defender_state (
                    key   TEXT PRIMARY KEY,
                    value BOOLEAN NOT NULL
                )",
            )?;
            Ok(client)
        })
        .await??;

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    /// Runs `f` against the client on the blocking pool.
    async fn with_client<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut postgres::Client) -> Result<R> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || {
            let mut client = client
                .lock()
                .map_err(|_| anyhow!("State database client poisoned"))?;
            f(&mut client)
        })
        .await?
    }
}

#[async_trait]
impl StateStore for PostgresStore {
    async fn read_in_challenge(&self) -> Result<bool> {
        self.with_client(|client| {
            let row = client.query_opt(
                "SELECT value FROM fp_defender_state WHERE key = $1",
                &[&IN_CHALLENGE_KEY],
            )?;
            Ok(row.map(|row| row.get::<_, bool>(0)).unwrap_or(false))
        })
        .await
    }

    async fn write_in_challenge(&self, in_challenge: bool) -> Result<()> {
        self.with_client(move |client| {
            client.execute(
                "INSERT INTO fp_defender_state (key, value) VALUES ($1, $2)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
                &[&IN_CHALLENGE_KEY, &in_challenge],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod test {
    use super::{JsonFileStore, StateStore};
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "fp-defender-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn missing_file_reads_false() {
        let store = JsonFileStore::new(scratch_path("missing"));
        assert!(!store.read_in_challenge().await.unwrap());
    }

    #[tokio::test]
    async fn flag_round_trips_through_disk() {
        let path = scratch_path("round-trip");
        let store = JsonFileStore::new(&path);

        store.write_in_challenge(true).await.unwrap();
        // A fresh store over the same file sees the flag, as after a restart.
        assert!(JsonFileStore::new(&path).read_in_challenge().await.unwrap());

        store.write_in_challenge(false).await.unwrap();
        assert!(!JsonFileStore::new(&path).read_in_challenge().await.unwrap());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"inChallenge\": false"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn write_leaves_no_staging_file() {
        let path = scratch_path("staging");
        let store = JsonFileStore::new(&path);
        store.write_in_challenge(true).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let path = scratch_path("corrupt");
        std::fs::write(&path, b"not json").unwrap();
        assert!(JsonFileStore::new(&path).read_in_challenge().await.is_err());
        let _ = std::fs::remove_file(&path);
    }
}
