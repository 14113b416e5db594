//! Remote-catalog fetch with a local download cache.
//!
//! The cache is write-once per URL: an existing local copy is reused
//! without touching the network. Downloads stream into a `.partial` file
//! that is renamed into place only on success, so a crashed fetch never
//! leaves a corrupt entry behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{info, warn};

use eval_common::{EvalError, EvalResult};

/// Credentials for catalogs that require them.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Derive a filesystem-safe cache filename from a URL.
fn cache_filename(url: &str) -> String {
    let tail = url
        .rsplit('/')
        .next()
        .filter(|t| !t.is_empty())
        .unwrap_or(url);
    let safe: String = tail
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "download".to_string()
    } else {
        safe
    }
}

/// Fetch a URL into the cache directory, returning the local path.
pub fn fetch_to_cache(
    url: &str,
    credentials: Option<&Credentials>,
    cache_dir: &Path,
) -> EvalResult<PathBuf> {
    std::fs::create_dir_all(cache_dir)
        .map_err(|_| EvalError::WorkDirUnwritable(cache_dir.display().to_string()))?;
    let final_path = cache_dir.join(cache_filename(url));
    if final_path.exists() {
        let len = std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            return Err(EvalError::CacheCorrupt(final_path.display().to_string()));
        }
        info!(url = %url, path = %final_path.display(), "reusing cached download");
        return Ok(final_path);
    }

    info!(url = %url, "fetching remote dataset");
    let client = Client::builder()
        .timeout(Duration::from_secs(600))
        .build()
        .map_err(|e| EvalError::RemoteFetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let mut request = client.get(url);
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }
    let response = request.send().map_err(|e| EvalError::RemoteFetchFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match response.status() {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(EvalError::AuthFailed(url.to_string()));
        }
        status if !status.is_success() => {
            return Err(EvalError::RemoteFetchFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }
        _ => {}
    }

    let body = response.bytes().map_err(|e| EvalError::RemoteFetchFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let partial = final_path.with_extension("partial");
    let write = std::fs::File::create(&partial).and_then(|mut f| {
        f.write_all(&body)?;
        f.flush()
    });
    if let Err(e) = write {
        std::fs::remove_file(&partial).ok();
        return Err(EvalError::RemoteFetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        });
    }
    if std::fs::rename(&partial, &final_path).is_err() {
        warn!(path = %partial.display(), "rename failed, falling back to copy");
        std::fs::copy(&partial, &final_path).map_err(|e| EvalError::RemoteFetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        std::fs::remove_file(&partial).ok();
    }

    info!(
        url = %url,
        path = %final_path.display(),
        bytes = body.len(),
        "download complete"
    );
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_filename_sanitization() {
        assert_eq!(
            cache_filename("https://example.org/data/tas_mon.nc"),
            "tas_mon.nc"
        );
        assert_eq!(
            cache_filename("https://example.org/q?dataset=5&param=2"),
            "q_dataset_5_param_2"
        );
    }

    #[test]
    fn test_existing_cache_entry_is_reused() {
        let dir = TempDir::new().unwrap();
        let cached = dir.path().join("tas_mon.nc");
        std::fs::write(&cached, b"already here").unwrap();
        // the URL is unreachable on purpose: a cache hit must not touch it
        let path = fetch_to_cache(
            "http://127.0.0.1:1/data/tas_mon.nc",
            None,
            dir.path(),
        )
        .unwrap();
        assert_eq!(path, cached);
        assert_eq!(std::fs::read(&path).unwrap(), b"already here");
    }

    #[test]
    fn test_empty_cache_entry_is_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("empty.nc"), b"").unwrap();
        let err = fetch_to_cache("http://127.0.0.1:1/empty.nc", None, dir.path()).unwrap_err();
        assert!(matches!(err, EvalError::CacheCorrupt(_)));
    }

    #[test]
    fn test_unreachable_host_is_fetch_failure() {
        let dir = TempDir::new().unwrap();
        let err = fetch_to_cache("http://127.0.0.1:1/missing.nc", None, dir.path()).unwrap_err();
        assert!(matches!(err, EvalError::RemoteFetchFailed { .. }));
    }
}
