use crate::error::ResolveError;
use crate::registry::{LibraryDescriptor, Registry};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const DEFAULT_VERSION: &str = "default";
pub const ALL_METHODS: &str = "__all__";

static METHOD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z.$_]+$").expect("method name regex"));

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// One lookup against one library version. `method == None` lists everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub lib: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub expand: u32,
    #[serde(default)]
    pub refresh: bool,
}

impl ResolutionRequest {
    pub fn new(lib: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            lib: lib.into(),
            version: version.into(),
            method: None,
            expand: 0,
            refresh: false,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_expand(mut self, expand: u32) -> Self {
        self.expand = expand;
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Parse `/<lib>[/<version>][/<method>][?expand=N&refresh]`.
    pub fn parse_path(raw: &str, registry: &Registry) -> Result<Self, ResolveError> {
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, query),
            None => (raw, ""),
        };
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some(lib) = parts.first().copied() else {
            return Err(ResolveError::InvalidRequest("missing library".into()));
        };
        let descriptor = registry.get(lib).map(|hit| hit.descriptor);
        let second = parts.get(1).copied();
        let (version, method) = match second {
            Some(v) if looks_like_version(v, descriptor) => (v, parts.get(2).copied()),
            _ => (DEFAULT_VERSION, second),
        };

        let mut request = ResolutionRequest::new(lib, version);
        request.method = method
            .filter(|m| *m != ALL_METHODS)
            .map(str::to_string);
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "expand" => request.expand = value.parse().unwrap_or(0),
                "refresh" => request.refresh = true,
                _ => {}
            }
        }
        Ok(request)
    }
}

fn looks_like_version(value: &str, descriptor: Option<&LibraryDescriptor>) -> bool {
    value.starts_with(|c: char| c.is_ascii_digit())
        || value == DEFAULT_VERSION
        || descriptor
            .and_then(|d| d.versions.as_ref())
            .is_some_and(|versions| versions.iter().any(|v| v == value))
}

/// A request checked against the registry, with defaults applied.
#[derive(Debug, Clone)]
pub struct ValidatedRequest<'r> {
    pub lib_id: &'r str,
    pub descriptor: &'r LibraryDescriptor,
    pub version: String,
    pub method: Option<String>,
    pub expand: u32,
    pub refresh: bool,
}

impl ValidatedRequest<'_> {
    pub fn cache_key(&self) -> String {
        crate::loader::library_key(self.lib_id, &self.version)
    }

    pub fn source_url(&self) -> String {
        self.descriptor.source_url(&self.version)
    }
}

pub fn validate<'r>(
    request: &ResolutionRequest,
    registry: &'r Registry,
    max_expand: u32,
) -> Result<ValidatedRequest<'r>, ResolveError> {
    let hit = registry
        .get(&request.lib)
        .ok_or_else(|| ResolveError::UnknownLibrary(request.lib.clone()))?;
    let descriptor = hit.descriptor;

    let version = if request.version.is_empty() || request.version == DEFAULT_VERSION {
        descriptor.default_version.clone().ok_or_else(|| {
            ResolveError::InvalidRequest(format!("{} has no default version", request.lib))
        })?
    } else {
        request.version.clone()
    };
    if !descriptor.allows_version(&version) {
        return Err(ResolveError::InvalidRequest(format!(
            "version {version} not available"
        )));
    }

    let method = request
        .method
        .as_deref()
        .filter(|m| !m.is_empty() && *m != ALL_METHODS);
    if let Some(method) = method {
        if !METHOD_NAME.is_match(method) {
            return Err(ResolveError::InvalidRequest(
                "method/namespace must match /^[0-9A-Z.$_]+$/i".into(),
            ));
        }
    }

    Ok(ValidatedRequest {
        lib_id: hit.id,
        descriptor,
        version,
        method: method.map(str::to_string),
        expand: request.expand.min(max_expand),
        refresh: request.refresh,
    })
}
