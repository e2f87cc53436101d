//! Run-level knobs and environment-derived settings.

use std::time::Duration;

/// Options governing one run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Hard bound on executed steps; exceeding it fails the run with
    /// [`crate::runtime::EngineError::DidNotConverge`].
    pub max_steps: u64,
    /// Per-source timeout inside the retrieval fan-out.
    pub source_timeout: Duration,
    /// Whether fetches consult and populate the query cache.
    pub cache_enabled: bool,
    /// Optional wall-clock limit for the whole run.
    pub deadline: Option<Duration>,
    /// Cap on retrieval results carried into the state per fetch.
    pub max_results: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_steps: 25,
            source_timeout: Duration::from_secs(10),
            cache_enabled: true,
            deadline: None,
            max_results: 10,
        }
    }
}

/// Resolve the SQLite database file name from the environment.
///
/// Loads `.env` if present, then reads `DELVER_DB_NAME`, falling back to
/// `delver.db`.
pub fn resolve_sqlite_db_name() -> String {
    dotenvy::dotenv().ok();
    std::env::var("DELVER_DB_NAME").unwrap_or_else(|_| "delver.db".to_string())
}
