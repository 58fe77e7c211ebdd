//! Global Bucket Store
//!
//! Durable, cross-process storage for the deployment-wide buckets, one
//! JSON file per granularity. Every read-modify-write happens under an
//! exclusive advisory lock covering the whole critical section; lock
//! acquisition is a bounded spin-retry, never an unbounded wait.
//!
//! All storage anomalies degrade to a conservative half-capacity default
//! instead of failing the admission pipeline: a lock that cannot be
//! acquired in time, a file that cannot be opened, and unparsable or
//! structurally invalid content are all recovered locally and logged.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::bucket::{Bucket, Granularity};

/// Bounded total wait for the file lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between non-blocking lock attempts.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// File-backed store for the shared global buckets.
#[derive(Debug, Clone)]
pub struct GlobalStore {
    data_dir: PathBuf,
    lock_timeout: Duration,
    retry_delay: Duration,
}

impl GlobalStore {
    /// Create a store rooted at `data_dir` with the default lock timing.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_lock_timing(data_dir, LOCK_TIMEOUT, LOCK_RETRY_DELAY)
    }

    /// Create a store with explicit lock timing (tests shrink both).
    ///
    /// The data directory is created here; if that fails the store falls
    /// back to a directory under the system temp dir rather than leaving
    /// the pipeline without a shared counter.
    pub fn with_lock_timing(
        data_dir: impl Into<PathBuf>,
        lock_timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        let requested = data_dir.into();
        let data_dir = match fs::create_dir_all(&requested) {
            Ok(()) => requested,
            Err(err) => {
                let fallback = std::env::temp_dir().join("scene_gate_rate_limits");
                warn!(
                    path = %requested.display(),
                    %err,
                    fallback = %fallback.display(),
                    "could not create rate limit data directory; using temp fallback"
                );
                if let Err(err) = fs::create_dir_all(&fallback) {
                    warn!(path = %fallback.display(), %err, "could not create fallback directory");
                }
                fallback
            }
        };

        Self {
            data_dir,
            lock_timeout,
            retry_delay,
        }
    }

    /// Path of the persisted bucket for one granularity.
    pub fn bucket_path(&self, granularity: Granularity) -> PathBuf {
        self.data_dir
            .join(format!("global_bucket_{granularity}.json"))
    }

    /// Read and refill the bucket without spending a token.
    ///
    /// The refreshed bucket is written back so refill progress persists
    /// even when the caller only inspects it.
    pub async fn peek(&self, granularity: Granularity, max: u64, now: u64) -> Bucket {
        self.locked_round_trip(granularity, max, now, false).await
    }

    /// Read, refill, and spend one token if any remains.
    pub async fn consume(&self, granularity: Granularity, max: u64, now: u64) -> Bucket {
        self.locked_round_trip(granularity, max, now, true).await
    }

    /// One full critical section: lock, read, recover-or-refill,
    /// optionally decrement, write back, unlock.
    ///
    /// The degraded paths (open failure, lock timeout) return the
    /// conservative default without writing anything.
    async fn locked_round_trip(
        &self,
        granularity: Granularity,
        max: u64,
        now: u64,
        spend: bool,
    ) -> Bucket {
        let path = self.bucket_path(granularity);
        let fallback = Bucket::conservative(max, now);

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "could not open global bucket file");
                return fallback;
            }
        };

        if !self.acquire_lock(&file).await {
            warn!(
                path = %path.display(),
                timeout_ms = self.lock_timeout.as_millis() as u64,
                "could not acquire bucket lock; high load, using conservative default"
            );
            return fallback;
        }

        let bucket = self.update_locked(&file, &path, granularity, max, now, spend);

        if let Err(err) = file.unlock() {
            warn!(path = %path.display(), %err, "failed to release bucket file lock");
        }

        bucket
    }

    /// Non-blocking lock attempts with a fixed backoff, bounded in total.
    async fn acquire_lock(&self, file: &File) -> bool {
        let start = Instant::now();
        loop {
            if file.try_lock_exclusive().is_ok() {
                return true;
            }
            if start.elapsed() >= self.lock_timeout {
                return false;
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Body of the critical section. Caller holds the exclusive lock.
    fn update_locked(
        &self,
        file: &File,
        path: &Path,
        granularity: Granularity,
        max: u64,
        now: u64,
        spend: bool,
    ) -> Bucket {
        let mut bucket = match read_bucket(file) {
            Ok(Some(persisted)) => persisted.refill(now, max, granularity.window()),
            Ok(None) => {
                debug!(path = %path.display(), "global bucket not yet persisted; starting at half capacity");
                Bucket::conservative(max, now)
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "invalid global bucket content; rebuilding");
                Bucket::conservative(max, now)
            }
        };

        if spend && bucket.tokens > 0 {
            bucket.tokens -= 1;
        }

        if let Err(err) = write_bucket(file, &bucket) {
            warn!(path = %path.display(), %err, "could not persist global bucket");
        }

        bucket
    }
}

/// Read the whole file and parse it. `Ok(None)` means the bucket has never
/// been persisted; any parse problem is an error so the caller can log it.
fn read_bucket(mut file: &File) -> io::Result<Option<Bucket>> {
    file.seek(SeekFrom::Start(0))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;

    if content.trim().is_empty() {
        return Ok(None);
    }

    let bucket = serde_json::from_str::<Bucket>(&content)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(Some(bucket))
}

/// Rewrite the file wholesale: truncate, then write, still under the lock.
fn write_bucket(mut file: &File, bucket: &Bucket) -> io::Result<()> {
    let json = serde_json::to_vec(bucket)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const T0: u64 = 1_700_000_000;

    fn fast_store(dir: &TempDir) -> GlobalStore {
        GlobalStore::with_lock_timing(
            dir.path(),
            Duration::from_millis(200),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_first_observation_starts_at_half_capacity() {
        let dir = TempDir::new().unwrap();
        let store = fast_store(&dir);

        let bucket = store.peek(Granularity::Minute, 10, T0).await;
        assert_eq!(bucket.tokens, 5);
        assert_eq!(bucket.last_refill, T0);

        // The default was persisted
        let content = fs::read_to_string(store.bucket_path(Granularity::Minute)).unwrap();
        let persisted: Bucket = serde_json::from_str(&content).unwrap();
        assert_eq!(persisted, bucket);
    }

    #[tokio::test]
    async fn test_peek_never_spends() {
        let dir = TempDir::new().unwrap();
        let store = fast_store(&dir);

        let first = store.peek(Granularity::Minute, 10, T0).await;
        let second = store.peek(Granularity::Minute, 10, T0).await;
        assert_eq!(first.tokens, second.tokens);
    }

    #[tokio::test]
    async fn test_consume_decrements_once_per_call() {
        let dir = TempDir::new().unwrap();
        let store = fast_store(&dir);

        let first = store.consume(Granularity::Minute, 10, T0).await;
        assert_eq!(first.tokens, 4); // half of 10, minus one

        let second = store.consume(Granularity::Minute, 10, T0).await;
        assert_eq!(second.tokens, 3);
    }

    #[tokio::test]
    async fn test_consume_floors_at_zero() {
        let dir = TempDir::new().unwrap();
        let store = fast_store(&dir);
        let path = store.bucket_path(Granularity::Day);

        fs::write(&path, r#"{"tokens":0,"last_refill":1700000000}"#).unwrap();

        let bucket = store.consume(Granularity::Day, 40, T0).await;
        assert_eq!(bucket.tokens, 0);
    }

    #[tokio::test]
    async fn test_refill_happens_inside_critical_section() {
        let dir = TempDir::new().unwrap();
        let store = fast_store(&dir);
        let path = store.bucket_path(Granularity::Minute);

        // Exhausted at T0; six seconds later one token has accrued
        fs::write(&path, format!(r#"{{"tokens":0,"last_refill":{T0}}}"#)).unwrap();

        let bucket = store.consume(Granularity::Minute, 10, T0 + 6).await;
        assert_eq!(bucket.tokens, 0); // refilled to 1, then spent

        let again = store.consume(Granularity::Minute, 10, T0 + 6).await;
        assert_eq!(again.tokens, 0); // nothing left to spend
    }

    #[tokio::test]
    async fn test_corrupt_content_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let store = fast_store(&dir);
        let path = store.bucket_path(Granularity::Minute);

        for corrupt in [
            "not json at all",
            r#"{"tokens":"plenty","last_refill":0}"#,
            r#"{"tokens":-5,"last_refill":0}"#,
            r#"{"last_refill":1700000000}"#,
        ] {
            fs::write(&path, corrupt).unwrap();
            let bucket = store.peek(Granularity::Minute, 10, T0).await;
            assert_eq!(bucket.tokens, 5, "content {corrupt:?} should rebuild");
            assert_eq!(bucket.last_refill, T0);
        }
    }

    #[tokio::test]
    async fn test_lock_timeout_returns_default_without_writing() {
        let dir = TempDir::new().unwrap();
        let store = fast_store(&dir);
        let path = store.bucket_path(Granularity::Minute);

        let original = r#"{"tokens":7,"last_refill":1700000000}"#;
        fs::write(&path, original).unwrap();

        // Hold the lock from another handle for the whole retry window
        let blocker = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        blocker.try_lock_exclusive().unwrap();

        let bucket = store.consume(Granularity::Minute, 10, T0 + 30).await;
        assert_eq!(bucket.tokens, 5); // floor(10 * 0.5)
        assert_eq!(bucket.last_refill, T0 + 30);

        // The degraded path must not have touched the file
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, original);

        blocker.unlock().unwrap();
    }

    #[tokio::test]
    async fn test_state_is_shared_across_store_instances() {
        let dir = TempDir::new().unwrap();
        let first = fast_store(&dir);
        let second = fast_store(&dir);

        first.consume(Granularity::Day, 40, T0).await;
        let seen = second.peek(Granularity::Day, 40, T0).await;
        assert_eq!(seen.tokens, 19); // 20 default minus one
    }

    #[tokio::test]
    async fn test_unwritable_data_dir_falls_back_to_temp() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"a file, not a directory").unwrap();

        // create_dir_all under a regular file fails, so the store must
        // degrade to the temp fallback instead of panicking. The fallback
        // directory persists across runs, so only the invariant holds.
        let store = GlobalStore::new(blocked.join("nested"));
        let bucket = store.peek(Granularity::Minute, 10, T0).await;
        assert!(bucket.tokens <= 10);
    }
}
