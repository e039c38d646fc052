use super::{Bundle, Evaluated, Sandbox, SandboxFactory, ValueKind};
use crate::error::{EvalError, SandboxError};
use rquickjs::{CatchResultExt, Context, FromJs, Runtime, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_STACK_BYTES: usize = 1024 * 1024;

/// Classifies a value and stringifies it the way `String(v)` does.
/// Functions keep their source text in QuickJS, so `text` is the literal
/// function as written in the library.
const DESCRIBE: &str = "(function (v) {\n\
  var kind = v === undefined ? 'undefined'\n\
    : v === null ? 'null'\n\
    : typeof v === 'function' ? 'function'\n\
    : typeof v === 'object' ? 'object'\n\
    : 'primitive';\n\
  var text;\n\
  try { text = String(v); } catch (e) { text = Object.prototype.toString.call(v); }\n\
  return JSON.stringify([kind, text]);\n\
})";

const OWN_KEYS: &str = "(function (o) {\n\
  var out = [];\n\
  if (o === null || (typeof o !== 'object' && typeof o !== 'function')) return '[]';\n\
  for (var k in o) { if (Object.prototype.hasOwnProperty.call(o, k)) out.push(k); }\n\
  return JSON.stringify(out);\n\
})";

/// Builds sandboxes backed by QuickJS, one runtime and global scope each.
///
/// `budget` bounds the whole life of a sandbox: once it elapses the
/// interrupt handler aborts whatever script is running.
#[derive(Debug, Clone)]
pub struct QuickJsFactory {
    budget: Duration,
    memory_limit: usize,
}

impl QuickJsFactory {
    pub fn new(budget: Duration, memory_limit_mb: usize) -> Self {
        Self {
            budget,
            memory_limit: memory_limit_mb.saturating_mul(1024 * 1024),
        }
    }
}

impl SandboxFactory for QuickJsFactory {
    type Sandbox = QuickJsSandbox;

    fn create(&self, bundle: &Bundle) -> Result<QuickJsSandbox, SandboxError> {
        let engine = |err: rquickjs::Error| SandboxError::Engine(err.to_string());
        let runtime = Runtime::new().map_err(engine)?;
        runtime.set_memory_limit(self.memory_limit);
        runtime.set_max_stack_size(MAX_STACK_BYTES);
        let deadline = Instant::now() + self.budget;
        runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));
        let context = Context::full(&runtime).map_err(engine)?;

        let mut sandbox = QuickJsSandbox {
            runtime,
            context,
            errors: Vec::new(),
        };

        if let Err(err) = sandbox.run(bundle.preamble.clone()) {
            return Err(SandboxError::Engine(format!("preamble failed: {err}")));
        }

        let body = bundle.body();
        debug!(bytes = body.len(), "executing library bundle");
        if let Err(err) = sandbox.run(body) {
            warn!("library threw at top level: {err}");
            sandbox.errors.push(err.message);
        }
        sandbox.drain_jobs();

        Ok(sandbox)
    }
}

pub struct QuickJsSandbox {
    runtime: Runtime,
    context: Context,
    errors: Vec<String>,
}

impl QuickJsSandbox {
    /// Execute `script` for its side effects.
    fn run(&self, script: String) -> Result<(), EvalError> {
        self.context.with(|ctx| {
            ctx.eval::<Value, _>(script)
                .map(drop)
                .catch(&ctx)
                .map_err(|err| EvalError::new(err.to_string()))
        })
    }

    fn eval_as<T>(&self, script: String) -> Result<T, EvalError>
    where
        T: for<'js> FromJs<'js>,
    {
        self.context.with(|ctx| {
            ctx.eval::<T, _>(script)
                .catch(&ctx)
                .map_err(|err| EvalError::new(err.to_string()))
        })
    }

    fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => debug!("pending job failed: {err}"),
            }
        }
    }
}

impl Sandbox for QuickJsSandbox {
    fn evaluate(&mut self, expression: &str) -> Result<Evaluated, EvalError> {
        let raw: String = self.eval_as(format!("{DESCRIBE}(\n{expression}\n)"))?;
        let (kind, text): (String, String) = serde_json::from_str(&raw)
            .map_err(|err| EvalError::new(format!("describe value: {err}")))?;
        let kind = match kind.as_str() {
            "undefined" => ValueKind::Undefined,
            "null" => ValueKind::Null,
            "function" => ValueKind::Function,
            "object" => ValueKind::Object,
            _ => ValueKind::Primitive,
        };
        Ok(Evaluated { kind, text })
    }

    fn own_enumerable_keys(&mut self, expression: &str) -> Result<Vec<String>, EvalError> {
        let raw: String = self.eval_as(format!("{OWN_KEYS}(\n{expression}\n)"))?;
        serde_json::from_str(&raw).map_err(|err| EvalError::new(format!("key listing: {err}")))
    }

    fn same_value(&mut self, left: &str, right: &str) -> Result<bool, EvalError> {
        self.eval_as(format!("((\n{left}\n) === (\n{right}\n))"))
    }

    fn errors(&self) -> &[String] {
        &self.errors
    }
}
