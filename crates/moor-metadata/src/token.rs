//! Metadata token cache
//!
//! The metadata service only answers requests carrying a session token
//! obtained with a `PUT`. Tokens live for hours, so they are kept in a small
//! file under a per-user runtime directory and reused across invocations of
//! the tool until they come within a minute of expiring.
//!
//! Several invocations may race on the same file without any locking. That is
//! fine as long as nobody ever observes a half-written file, so refreshed
//! tokens are written to a temporary file in the same directory and renamed
//! over the old one.

use crate::config::MetadataConfig;
use crate::error::{MetadataError, Result};
use std::fmt;
use std::fs::{self, DirBuilder, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Header carrying the requested token lifetime on issuance
pub const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

/// Header carrying the token on every metadata request
pub const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

const TOKEN_FILE: &str = "imds-token";
const TOKEN_PATH: &str = "latest/api/token";

/// A bearer token for the metadata service
#[derive(Clone, PartialEq, Eq)]
pub struct MetadataToken {
    value: String,
    issued_at: SystemTime,
    ttl: Duration,
}

impl MetadataToken {
    pub fn new(value: impl Into<String>, issued_at: SystemTime, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            issued_at,
            ttl,
        }
    }

    /// The raw token, as sent in [`TOKEN_HEADER`]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the token was issued (the cache file's modification time)
    pub fn issued_at(&self) -> SystemTime {
        self.issued_at
    }

    /// Whether the token is older than `ttl - margin` at `now`
    ///
    /// A modification time in the future counts as age zero.
    pub fn is_stale_at(&self, now: SystemTime, margin: Duration) -> bool {
        let age = now.duration_since(self.issued_at).unwrap_or_default();
        age > self.ttl.saturating_sub(margin)
    }
}

impl fmt::Debug for MetadataToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// File-backed token cache shared by every invocation on the host
#[derive(Debug, Clone)]
pub struct TokenCache {
    http: reqwest::Client,
    endpoint: String,
    cache_dir: PathBuf,
    ttl: Duration,
    refresh_margin: Duration,
}

impl TokenCache {
    /// Create a cache using the given HTTP client and configuration
    pub fn new(http: reqwest::Client, config: &MetadataConfig) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            cache_dir: config.cache_dir.clone().unwrap_or_else(default_cache_dir),
            ttl: config.token_ttl,
            refresh_margin: config.refresh_margin,
        }
    }

    /// Full path of the cache file
    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }

    /// Return a token that is not stale, issuing a new one if needed
    pub async fn get_token(&self) -> Result<MetadataToken> {
        prepare_dir(&self.cache_dir)?;
        let path = self.cache_file();

        if let Some(token) = self.read_cached(&path) {
            debug!(path = %path.display(), "Using cached metadata token");
            return Ok(token);
        }

        let token = self.issue().await?;
        write_atomic(&self.cache_dir, &path, token.value())?;
        info!(path = %path.display(), ttl_secs = self.ttl.as_secs(), "Refreshed metadata token");

        Ok(token)
    }

    /// Read the cached token if present, non-empty and fresh
    fn read_cached(&self, path: &Path) -> Option<MetadataToken> {
        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat token cache, refreshing");
                return None;
            }
        };

        let value = match fs::read_to_string(path) {
            Ok(value) => value.trim().to_string(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read token cache, refreshing");
                return None;
            }
        };

        if value.is_empty() {
            return None;
        }

        let token = MetadataToken::new(value, modified, self.ttl);
        if token.is_stale_at(SystemTime::now(), self.refresh_margin) {
            debug!(path = %path.display(), "Cached metadata token is stale");
            return None;
        }

        Some(token)
    }

    /// Ask the metadata service for a new token
    async fn issue(&self) -> Result<MetadataToken> {
        let url = format!("{}{}", self.endpoint, TOKEN_PATH);
        debug!(url = %url, "Requesting metadata token");

        let response = self
            .http
            .put(&url)
            .header(TOKEN_TTL_HEADER, self.ttl.as_secs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Unavailable(format!(
                "token request to {} returned {}",
                url, status
            )));
        }

        let value = response.text().await?.trim().to_string();
        if value.is_empty() {
            return Err(MetadataError::Unavailable(
                "metadata service returned an empty token".to_string(),
            ));
        }

        Ok(MetadataToken::new(value, SystemTime::now(), self.ttl))
    }
}

/// Per-user runtime directory for the token file
///
/// `$XDG_RUNTIME_DIR/moor` when the session provides one, otherwise
/// `<tmpdir>/moor-<uid>`.
pub fn default_cache_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("moor"),
        _ => std::env::temp_dir().join(format!("moor-{}", nix::unistd::getuid())),
    }
}

/// Create the cache directory (0700) and check that we own it
fn prepare_dir(dir: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| {
            MetadataError::Environment(format!("cannot create {}: {}", dir.display(), e))
        })?;

    let meta = fs::symlink_metadata(dir).map_err(|e| {
        MetadataError::Environment(format!("cannot stat {}: {}", dir.display(), e))
    })?;

    if !meta.is_dir() {
        return Err(MetadataError::Environment(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    let uid = nix::unistd::getuid().as_raw();
    if meta.uid() != uid {
        return Err(MetadataError::Environment(format!(
            "{} is owned by uid {}, not {}",
            dir.display(),
            meta.uid(),
            uid
        )));
    }

    if meta.mode() & 0o077 != 0 {
        fs::set_permissions(dir, Permissions::from_mode(0o700)).map_err(|e| {
            MetadataError::Environment(format!("cannot restrict {}: {}", dir.display(), e))
        })?;
    }

    Ok(())
}

/// Replace `path` with `contents` via a temp file in `dir` and a rename
fn write_atomic(dir: &Path, path: &Path, contents: &str) -> Result<()> {
    let env_err = |e: std::io::Error| {
        MetadataError::Environment(format!("cannot write {}: {}", path.display(), e))
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".imds-token.")
        .tempfile_in(dir)
        .map_err(env_err)?;

    tmp.as_file()
        .set_permissions(Permissions::from_mode(0o600))
        .map_err(env_err)?;
    tmp.write_all(contents.as_bytes()).map_err(env_err)?;
    tmp.as_file().sync_all().map_err(env_err)?;
    tmp.persist(path).map_err(|e| env_err(e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs::File;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cache_for(server: &MockServer, dir: &Path) -> TokenCache {
        let config = MetadataConfig::new(server.uri()).with_cache_dir(dir);
        TokenCache::new(reqwest::Client::new(), &config)
    }

    fn backdate(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    async fn mount_token(server: &MockServer, body: &str, expected_calls: u64) {
        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .and(header(TOKEN_TTL_HEADER, "21600"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn test_token_staleness() {
        let issued = SystemTime::now() - Duration::from_secs(21541);
        let ttl = Duration::from_secs(21600);
        let margin = Duration::from_secs(60);

        let token = MetadataToken::new("t", issued, ttl);
        assert!(token.is_stale_at(SystemTime::now(), margin));

        let token = MetadataToken::new("t", SystemTime::now() - Duration::from_secs(100), ttl);
        assert!(!token.is_stale_at(SystemTime::now(), margin));

        // clock skew: issued in the future is treated as brand new
        let token = MetadataToken::new("t", SystemTime::now() + Duration::from_secs(100), ttl);
        assert!(!token.is_stale_at(SystemTime::now(), margin));
    }

    #[test]
    fn test_debug_redacts_value() {
        let token = MetadataToken::new("secret-value", SystemTime::now(), Duration::from_secs(1));
        let printed = format!("{:?}", token);
        assert!(!printed.contains("secret-value"));
        assert!(printed.contains("redacted"));
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_file_issues_token() {
        let server = MockServer::start().await;
        mount_token(&server, "fresh-token\n", 1).await;
        let temp = tempdir().unwrap();
        let dir = temp.path().join("moor");

        let cache = cache_for(&server, &dir);
        let token = cache.get_token().await.unwrap();

        assert_eq!(token.value(), "fresh-token");
        assert_eq!(fs::read_to_string(cache.cache_file()).unwrap(), "fresh-token");

        let dir_mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        let file_mode = fs::metadata(cache.cache_file()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);

        server.verify().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_stale_file_is_refreshed_once() {
        let server = MockServer::start().await;
        mount_token(&server, "fresh-token", 1).await;
        let temp = tempdir().unwrap();

        let cache = cache_for(&server, temp.path());
        fs::write(cache.cache_file(), "old-token").unwrap();
        backdate(&cache.cache_file(), Duration::from_secs(21600 - 59));

        let token = cache.get_token().await.unwrap();
        assert_eq!(token.value(), "fresh-token");
        assert_eq!(fs::read_to_string(cache.cache_file()).unwrap(), "fresh-token");

        // the refreshed file is now fresh, so a second call is served locally
        let token = cache.get_token().await.unwrap();
        assert_eq!(token.value(), "fresh-token");

        server.verify().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_fresh_file_issues_nothing() {
        let server = MockServer::start().await;
        mount_token(&server, "unused", 0).await;
        let temp = tempdir().unwrap();

        let cache = cache_for(&server, temp.path());
        fs::write(cache.cache_file(), "cached-token\n").unwrap();
        backdate(&cache.cache_file(), Duration::from_secs(21600 - 61));

        let token = cache.get_token().await.unwrap();
        assert_eq!(token.value(), "cached-token");

        server.verify().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_empty_file_is_refreshed() {
        let server = MockServer::start().await;
        mount_token(&server, "fresh-token", 1).await;
        let temp = tempdir().unwrap();

        let cache = cache_for(&server, temp.path());
        fs::write(cache.cache_file(), "").unwrap();

        assert_eq!(cache.get_token().await.unwrap().value(), "fresh-token");
        server.verify().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_empty_response_is_unavailable() {
        let server = MockServer::start().await;
        mount_token(&server, "  \n", 1).await;
        let temp = tempdir().unwrap();

        let cache = cache_for(&server, temp.path());
        let result = cache.get_token().await;

        assert!(matches!(result, Err(MetadataError::Unavailable(_))));
        assert!(!cache.cache_file().exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_error_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let temp = tempdir().unwrap();

        let result = cache_for(&server, temp.path()).get_token().await;
        let err = result.unwrap_err();
        assert!(matches!(err, MetadataError::Unavailable(_)));
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    #[serial]
    async fn test_uncreatable_dir_is_environment_error() {
        let server = MockServer::start().await;
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "not a dir").unwrap();

        let result = cache_for(&server, &blocker.join("moor")).get_token().await;
        assert!(matches!(result, Err(MetadataError::Environment(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_loose_dir_permissions_are_tightened() {
        let server = MockServer::start().await;
        mount_token(&server, "fresh-token", 1).await;
        let temp = tempdir().unwrap();
        fs::set_permissions(temp.path(), Permissions::from_mode(0o755)).unwrap();

        cache_for(&server, temp.path()).get_token().await.unwrap();

        let mode = fs::metadata(temp.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    #[serial]
    async fn test_refresh_replaces_file_by_rename() {
        let server = MockServer::start().await;
        mount_token(&server, "fresh-token", 1).await;
        let temp = tempdir().unwrap();

        let cache = cache_for(&server, temp.path());
        fs::write(cache.cache_file(), "old-token").unwrap();
        backdate(&cache.cache_file(), Duration::from_secs(21600));
        let stale_inode = fs::metadata(cache.cache_file()).unwrap().ino();

        cache.get_token().await.unwrap();

        // a new inode means the old file was replaced, not rewritten in place
        assert_ne!(fs::metadata(cache.cache_file()).unwrap().ino(), stale_inode);
        let entries: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![TOKEN_FILE.to_string()]);
        server.verify().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[serial]
    async fn test_concurrent_refreshes_never_expose_empty_file() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh-token"))
            .mount(&server)
            .await;
        let temp = tempdir().unwrap();

        let cache = cache_for(&server, temp.path());
        let file = cache.cache_file();
        fs::write(&file, "old-token").unwrap();
        backdate(&file, Duration::from_secs(21600));

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = stop.clone();
            let file = file.clone();
            std::thread::spawn(move || {
                let mut reads = 0usize;
                loop {
                    let contents = fs::read_to_string(&file).unwrap();
                    assert!(!contents.trim().is_empty(), "token file was empty");
                    reads += 1;
                    if stop.load(Ordering::Relaxed) {
                        return reads;
                    }
                }
            })
        };

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect();
        for task in tasks {
            let token = task.await.unwrap().unwrap();
            assert_eq!(token.value(), "fresh-token");
        }

        stop.store(true, Ordering::Relaxed);
        assert!(reader.join().unwrap() > 0);
        assert_eq!(fs::read_to_string(&file).unwrap(), "fresh-token");
    }

    #[test]
    #[serial]
    fn test_default_cache_dir_prefers_runtime_dir() {
        let saved = std::env::var_os("XDG_RUNTIME_DIR");

        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/4242");
        assert_eq!(default_cache_dir(), PathBuf::from("/run/user/4242/moor"));

        std::env::remove_var("XDG_RUNTIME_DIR");
        let fallback = default_cache_dir();
        assert!(fallback.starts_with(std::env::temp_dir()));
        assert!(fallback
            .to_string_lossy()
            .ends_with(&format!("moor-{}", nix::unistd::getuid())));

        if let Some(saved) = saved {
            std::env::set_var("XDG_RUNTIME_DIR", saved);
        }
    }
}
