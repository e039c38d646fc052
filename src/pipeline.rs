//! Request orchestration: load, execute, resolve, annotate.
//!
//! Sandbox work for one request runs on its own worker thread so the caller
//! can bound it with a timeout. The worker reports through a [`ReadyLatch`];
//! if it dies before reporting, a drop guard reports the crash instead.

use crate::config::Config;
use crate::error::{ResolveError, SandboxError};
use crate::linkify::Linkifier;
use crate::loader::{self, Loader};
use crate::model::{
    Invalid, MethodList, NamespaceFailure, NamespaceMethods, RelatedMethod, RelatedMethodEntry,
    SourceData,
};
use crate::registry::{LibraryDescriptor, Registry};
use crate::request::{self, ResolutionRequest, ValidatedRequest};
use crate::resolver::{RelatedOrder, Resolver, split_namespace};
use crate::sandbox::{Bundle, ReadyLatch, Sandbox, SandboxFactory};
use crate::source::SourceText;
use crate::util;
use regex::Regex;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub timeout: Duration,
    pub max_expand: u32,
    pub related_limit: usize,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.eval_timeout_secs),
            max_expand: config.max_expand,
            related_limit: config.related_limit,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything the sandbox worker needs, owned.
struct Job {
    lib_id: String,
    version: String,
    method: Option<String>,
    expand: usize,
    related_limit: usize,
    descriptor: LibraryDescriptor,
    source: String,
}

impl Job {
    fn link(&self, fully_qualified_name: &str) -> String {
        format!("/{}/{}/{}", self.lib_id, self.version, fully_qualified_name)
    }

    fn entries(&self, methods: Vec<RelatedMethod>) -> Vec<RelatedMethodEntry> {
        methods
            .into_iter()
            .map(|m| RelatedMethodEntry {
                link: self.link(&m.fully_qualified_name),
                name: m.name,
                fully_qualified_name: m.fully_qualified_name,
            })
            .collect()
    }

    fn real_version(&self, source: &SourceText) -> String {
        self.descriptor
            .get_real_version
            .as_deref()
            .and_then(|pattern| source.real_version(pattern))
            .unwrap_or_else(|| self.version.clone())
    }
}

pub struct Pipeline<L, F> {
    registry: Arc<Registry>,
    loader: Arc<L>,
    factory: Arc<F>,
    settings: Settings,
}

impl<L, F> Pipeline<L, F>
where
    L: Loader,
    F: SandboxFactory + Send + Sync + 'static,
{
    pub fn new(registry: Arc<Registry>, loader: L, factory: F, settings: Settings) -> Self {
        Self {
            registry,
            loader: Arc::new(loader),
            factory: Arc::new(factory),
            settings,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Locate one method and build its annotated, line-numbered payload.
    pub fn find_single_method(&self, request: &ResolutionRequest) -> Result<SourceData, ResolveError> {
        let valid = request::validate(request, &self.registry, self.settings.max_expand)?;
        if valid.method.is_none() {
            return Err(ResolveError::InvalidRequest("missing method name".into()));
        }
        let (job, bundle) = self.prepare(&valid)?;
        let started = Instant::now();
        let result = run_isolated(
            Arc::clone(&self.factory),
            bundle,
            self.settings.timeout,
            move |sandbox| single_method(job, sandbox),
        );
        match &result {
            Ok(data) => info!(
                lib = valid.lib_id,
                version = %valid.version,
                name = %data.name,
                start = data.function_span.start,
                end = data.function_span.end,
                elapsed = ?started.elapsed(),
                "method resolved"
            ),
            Err(err) => warn!(
                lib = valid.lib_id,
                version = %valid.version,
                kind = err.kind(),
                "resolution failed: {}",
                util::truncate_str_bytes(&err.to_string(), 300)
            ),
        }
        result
    }

    /// List the methods of every configured namespace.
    pub fn find_all_methods(&self, request: &ResolutionRequest) -> Result<MethodList, ResolveError> {
        let mut valid = request::validate(request, &self.registry, self.settings.max_expand)?;
        valid.method = None;
        let (job, bundle) = self.prepare(&valid)?;
        let result = run_isolated(
            Arc::clone(&self.factory),
            bundle,
            self.settings.timeout,
            move |sandbox| all_methods(job, sandbox),
        );
        if let Ok(list) = &result {
            info!(
                lib = valid.lib_id,
                namespaces = list.namespaces.len(),
                failed = list.failed.len(),
                "methods listed"
            );
        }
        result
    }

    fn prepare(&self, valid: &ValidatedRequest<'_>) -> Result<(Job, Bundle), ResolveError> {
        let descriptor = valid.descriptor;
        let source = self
            .loader
            .load(&valid.cache_key(), &valid.source_url(), valid.refresh)?;
        let companion = match descriptor.companion_url(&valid.version) {
            Some(url) => {
                debug!(%url, "loading required companion script");
                Some(
                    self.loader
                        .load(&loader::companion_key(url), url, valid.refresh)?,
                )
            }
            None => None,
        };
        let bundle = Bundle::new(source.clone())
            .with_nullify(descriptor.nullify_prelude())
            .with_companion(companion);
        let job = Job {
            lib_id: valid.lib_id.to_string(),
            version: valid.version.clone(),
            method: valid.method.clone(),
            expand: valid.expand as usize,
            related_limit: self.settings.related_limit,
            descriptor: descriptor.clone(),
            source,
        };
        Ok((job, bundle))
    }
}

const WORKER_STACK_BYTES: usize = 8 * 1024 * 1024;

struct CrashGuard<T>(Arc<ReadyLatch<Result<T, ResolveError>>>);

impl<T> Drop for CrashGuard<T> {
    fn drop(&mut self) {
        if !self.0.is_fired() {
            self.0.fire(Err(SandboxError::Crashed.into()));
        }
    }
}

/// Build a sandbox from `bundle` on a worker thread and run `work` in it,
/// waiting at most `timeout` for the outcome.
pub fn run_isolated<F, T, W>(
    factory: Arc<F>,
    bundle: Bundle,
    timeout: Duration,
    work: W,
) -> Result<T, ResolveError>
where
    F: SandboxFactory + Send + Sync + 'static,
    T: Send + 'static,
    W: FnOnce(&mut F::Sandbox) -> Result<T, ResolveError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let latch = Arc::new(ReadyLatch::new(tx));

    thread::Builder::new()
        .name("jsapi-sandbox".into())
        .stack_size(WORKER_STACK_BYTES)
        .spawn(move || {
            let guard = CrashGuard(Arc::clone(&latch));
            let outcome = factory
                .create(&bundle)
                .map_err(ResolveError::from)
                .and_then(|mut sandbox| {
                    if !sandbox.errors().is_empty() {
                        return Err(SandboxError::Uncaught(sandbox.errors().to_vec()).into());
                    }
                    debug!("sandbox ready");
                    work(&mut sandbox)
                });
            latch.fire(outcome);
            drop(guard);
        })
        .map_err(|err| SandboxError::Engine(format!("spawn worker: {err}")))?;

    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => {
            warn!(?timeout, "sandbox worker timed out, abandoning it");
            Err(ResolveError::Timeout(timeout.as_secs()))
        }
        Err(RecvTimeoutError::Disconnected) => Err(SandboxError::Crashed.into()),
    }
}

fn invalid_error(reason: Invalid, method: &str, lib: &str) -> ResolveError {
    match reason {
        Invalid::NotAFunction => ResolveError::NotAFunction(method.to_string()),
        Invalid::NativeFunction => ResolveError::NativeFunction(method.to_string()),
        Invalid::EmptyFunction => ResolveError::EmptyFunction(method.to_string()),
        Invalid::NotInSource => ResolveError::LocationNotFound {
            name: method.to_string(),
            lib: lib.to_string(),
        },
    }
}

/// Documentation link for `name` from the first matching rule.
pub fn documentation_link(rules: &[(String, String)], name: &str) -> Option<String> {
    for (pattern, template) in rules {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(err) => {
                warn!("invalid documentation pattern {pattern:?}: {err}");
                continue;
            }
        };
        if re.is_match(name) {
            return Some(re.replace(name, template.as_str()).into_owned());
        }
    }
    None
}

fn single_method<S: Sandbox>(job: Job, sandbox: &mut S) -> Result<SourceData, ResolveError> {
    let method = job.method.clone().unwrap_or_default();
    let source = SourceText::new(job.source.as_str());
    let mut resolver = Resolver::new(sandbox, &source, &job.descriptor);

    let resolved = resolver
        .resolve(&method)
        .ok_or_else(|| ResolveError::NotFound(method.clone()))?;
    let function_span = resolved
        .checked_span()
        .map_err(|reason| invalid_error(reason, &method, &job.lib_id))?;
    let (raw_namespace, _) = split_namespace(&resolved.matched_expression);

    let mut related = if raw_namespace.is_empty() {
        Vec::new()
    } else {
        resolver
            .related_methods(
                raw_namespace,
                Some(&resolved.matched_expression),
                RelatedOrder::Similarity(&resolved.name),
            )
            .unwrap_or_else(|err| {
                debug!(namespace = raw_namespace, "related methods unavailable: {err}");
                Vec::new()
            })
    };
    related.truncate(job.related_limit);

    let span = function_span.expand(job.expand, source.line_count());
    let snippet = source.slice_lines(span);
    let annotated =
        Linkifier::new(&job.descriptor.look_in).annotate(&snippet, &mut resolver, raw_namespace);

    let function_start = function_span.start - span.start;
    Ok(SourceData {
        documentation: documentation_link(&job.descriptor.documentation, &resolved.fully_qualified_name),
        version: job.real_version(&source),
        source_url: job.descriptor.source_url(&job.version),
        related: job.entries(related),
        name: resolved.fully_qualified_name,
        namespace: resolved.namespace,
        span,
        function_span,
        function_start,
        function_end: function_start + (function_span.end - function_span.start),
        source: annotated,
    })
}

fn all_methods<S: Sandbox>(job: Job, sandbox: &mut S) -> Result<MethodList, ResolveError> {
    let source = SourceText::new(job.source.as_str());
    let mut resolver = Resolver::new(sandbox, &source, &job.descriptor);
    let mut namespaces = Vec::new();
    let mut failed = Vec::new();

    for namespace in &job.descriptor.look_in {
        match resolver.related_methods(namespace, None, RelatedOrder::Alphabetical) {
            Ok(methods) => namespaces.push(NamespaceMethods {
                namespace: namespace.clone(),
                methods: job.entries(methods),
            }),
            Err(err) => {
                warn!(%namespace, "namespace could not be listed: {err}");
                failed.push(NamespaceFailure {
                    namespace: namespace.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(MethodList {
        version: job.real_version(&source),
        source_url: job.descriptor.source_url(&job.version),
        namespaces,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::table::{TableFactory, TableSandbox};

    #[test]
    fn documentation_link_uses_first_match() {
        let rules = vec![
            ("(unclosed".to_string(), "x".to_string()),
            (r"^jQuery\.fn\.(.+)$".to_string(), "http://api.jquery.com/$1/".to_string()),
            (r"^jQuery\.(.+)$".to_string(), "http://api.jquery.com/jQuery.$1/".to_string()),
        ];
        assert_eq!(
            documentation_link(&rules, "jQuery.fn.data").as_deref(),
            Some("http://api.jquery.com/data/")
        );
        assert_eq!(
            documentation_link(&rules, "jQuery.ajax").as_deref(),
            Some("http://api.jquery.com/jQuery.ajax/")
        );
        assert_eq!(documentation_link(&rules, "_.map"), None);
    }

    #[test]
    fn run_isolated_reports_uncaught_errors() {
        let factory = Arc::new(TableFactory::new(TableSandbox::new().with_error("ReferenceError: $ is not defined")));
        let result = run_isolated(factory, Bundle::new(""), Duration::from_secs(5), |_| Ok(()));
        assert!(matches!(
            result,
            Err(ResolveError::Sandbox(SandboxError::Uncaught(_)))
        ));
    }

    #[test]
    fn run_isolated_times_out() {
        let factory = Arc::new(TableFactory::new(TableSandbox::new()));
        let result = run_isolated(factory, Bundle::new(""), Duration::from_millis(20), |_| {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        assert!(matches!(result, Err(ResolveError::Timeout(_))));
    }

    #[test]
    fn run_isolated_survives_worker_panic() {
        let factory = Arc::new(TableFactory::new(TableSandbox::new()));
        let result: Result<(), _> =
            run_isolated(factory, Bundle::new(""), Duration::from_secs(5), |_| {
                panic!("worker blew up")
            });
        assert!(matches!(
            result,
            Err(ResolveError::Sandbox(SandboxError::Crashed))
        ));
    }
}
