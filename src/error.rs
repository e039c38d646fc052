use thiserror::Error;

/// Failure to obtain library text from the cache or the network.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("cache error on {path}: {source}")]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {url} failed: {message}")]
    Remote { url: String, message: String },
}

/// The isolated scope could not be built or the library threw at top level.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("script engine failed to start: {0}")]
    Engine(String),
    #[error("library threw during execution: {}", .0.join("; "))]
    Uncaught(Vec<String>),
    #[error("sandbox worker exited without reporting")]
    Crashed,
}

/// An expression evaluated inside the sandbox threw.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal outcome of a single resolution request.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("library `{0}` not available")]
    UnknownLibrary(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("cannot inspect this library: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("`{0}` is not a function, only functions can be shown")]
    NotAFunction(String),
    #[error("`{0}` is a native function")]
    NativeFunction(String),
    #[error("`{0}` is an empty function")]
    EmptyFunction(String),
    #[error("found `{name}` but it does not appear in the source of {lib}")]
    LocationNotFound { name: String, lib: String },
    #[error("resolution did not finish within {0}s")]
    Timeout(u64),
}

impl ResolveError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::UnknownLibrary(_) => "unknown_library",
            ResolveError::InvalidRequest(_) => "invalid_request",
            ResolveError::Fetch(_) => "fetch",
            ResolveError::Sandbox(_) => "sandbox",
            ResolveError::NotFound(_) => "not_found",
            ResolveError::NotAFunction(_) => "not_a_function",
            ResolveError::NativeFunction(_) => "native_function",
            ResolveError::EmptyFunction(_) => "empty_function",
            ResolveError::LocationNotFound { .. } => "location_not_found",
            ResolveError::Timeout(_) => "timeout",
        }
    }
}
