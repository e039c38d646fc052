use crate::error::FetchError;
use crate::util;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Remote side of the loader.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Plain HTTP(S) GET.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    agent: ureq::Agent,
}

impl HttpFetch {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Fetch for HttpFetch {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let remote = |message: String| FetchError::Remote {
            url: url.to_string(),
            message,
        };
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| remote(err.to_string()))?;
        response
            .into_string()
            .map_err(|err| remote(format!("read body: {err}")))
    }
}

/// Source of library text; `refresh` bypasses and overwrites any cached copy.
pub trait Loader: Send + Sync {
    fn load(&self, key: &str, url: &str, refresh: bool) -> Result<String, FetchError>;
}

/// File cache under one directory, written through from a [`Fetch`].
///
/// Each `<key>.js` has a `<key>.js.blake3` digest next to it. A file whose
/// digest is missing or wrong is treated as absent and fetched again.
pub struct CachedLoader<F: Fetch> {
    cache_dir: PathBuf,
    fetch: F,
}

impl<F: Fetch> CachedLoader<F> {
    pub fn new(cache_dir: impl Into<PathBuf>, fetch: F) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetch,
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.js", sanitize_key(key)))
    }

    fn read_cached(&self, path: &Path) -> Result<Option<String>, FetchError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(cache_error(path, err)),
        };
        let expected = fs::read_to_string(digest_path(path)).ok();
        let actual = blake3::hash(content.as_bytes()).to_hex().to_string();
        if expected.as_deref().map(str::trim) != Some(actual.as_str()) {
            warn!("cache digest mismatch for {}, refetching", path.display());
            return Ok(None);
        }
        Ok(Some(content))
    }

    fn write_cached(&self, path: &Path, content: &str) -> Result<(), FetchError> {
        util::ensure_parent_dir(path).map_err(|err| cache_error(path, err))?;
        let partial = path.with_extension("js.part");
        fs::write(&partial, content).map_err(|err| cache_error(&partial, err))?;
        fs::rename(&partial, path).map_err(|err| cache_error(path, err))?;
        let digest = blake3::hash(content.as_bytes()).to_hex().to_string();
        fs::write(digest_path(path), digest).map_err(|err| cache_error(path, err))?;
        Ok(())
    }
}

impl<F: Fetch> Loader for CachedLoader<F> {
    fn load(&self, key: &str, url: &str, refresh: bool) -> Result<String, FetchError> {
        let path = self.path_for(key);
        if !refresh {
            if let Some(content) = self.read_cached(&path)? {
                debug!("serving {} from cache", path.display());
                return Ok(content);
            }
        }
        info!(%url, "fetching library source");
        let content = self.fetch.fetch(url)?;
        self.write_cached(&path, &content)?;
        debug!(bytes = content.len(), "cached {}", path.display());
        Ok(content)
    }
}

impl<T: Loader + ?Sized> Loader for Box<T> {
    fn load(&self, key: &str, url: &str, refresh: bool) -> Result<String, FetchError> {
        (**self).load(key, url, refresh)
    }
}

/// In-memory texts keyed by cache key. Keys it does not hold go to the
/// fallback loader when one is set, otherwise they fail.
#[derive(Clone, Default)]
pub struct StaticLoader {
    texts: HashMap<String, String>,
    fallback: Option<Arc<dyn Loader>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.texts.insert(key.into(), text.into());
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Loader>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl Loader for StaticLoader {
    fn load(&self, key: &str, url: &str, refresh: bool) -> Result<String, FetchError> {
        if let Some(text) = self.texts.get(key) {
            return Ok(text.clone());
        }
        match &self.fallback {
            Some(fallback) => {
                debug!(key, "not held locally, using fallback loader");
                fallback.load(key, url, refresh)
            }
            None => Err(FetchError::Remote {
                url: url.to_string(),
                message: format!("no local source for {key}"),
            }),
        }
    }
}

/// Cache key for a library version.
pub fn library_key(lib: &str, version: &str) -> String {
    format!("{lib}.{version}")
}

/// Cache key for a companion script: its file stem.
pub fn companion_key(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let stem = file.strip_suffix(".js").unwrap_or(file);
    if stem.is_empty() {
        sanitize_key(url)
    } else {
        stem.to_string()
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn digest_path(path: &Path) -> PathBuf {
    path.with_extension("js.blake3")
}

fn cache_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Cache {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn companion_key_is_file_stem() {
        assert_eq!(
            companion_key("http://code.jquery.com/jquery-1.6.4.js"),
            "jquery-1.6.4"
        );
        assert_eq!(companion_key("http://x.org/lib.js?v=2"), "lib");
        assert_eq!(companion_key("http://x.org/"), "http___x.org_");
    }

    #[test]
    fn static_loader_defers_missing_keys() {
        let remote = StaticLoader::new().with("dep", "var Dep = {};");
        let local = StaticLoader::new()
            .with("lib.1.0", "var Lib = {};")
            .with_fallback(Arc::new(remote));
        assert_eq!(local.load("lib.1.0", "http://x/lib.js", false).unwrap(), "var Lib = {};");
        assert_eq!(local.load("dep", "http://x/dep.js", false).unwrap(), "var Dep = {};");
        assert!(matches!(
            local.load("other", "http://x/other.js", false),
            Err(FetchError::Remote { .. })
        ));
        assert!(StaticLoader::new().load("dep", "http://x/dep.js", false).is_err());
    }

    #[test]
    fn keys_cannot_escape_cache_dir() {
        let loader = CachedLoader::new("/tmp/cache", HttpFetch::new(Duration::from_secs(1)));
        let path = loader.path_for("../../etc/passwd");
        assert_eq!(path, PathBuf::from("/tmp/cache/.._.._etc_passwd.js"));
    }
}
