use crate::error::ResolveError;
use crate::loader::Loader;
use crate::pipeline::Pipeline;
use crate::request::ResolutionRequest;
use crate::sandbox::SandboxFactory;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::time::Instant;
use tracing::{error, info};

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

#[derive(Deserialize)]
struct PathParams {
    path: String,
}

/// Answer one JSON request per stdin line until EOF.
pub fn serve<L, F>(pipeline: &Pipeline<L, F>) -> Result<()>
where
    L: Loader,
    F: SandboxFactory + Send + Sync + 'static,
{
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                error!("stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => handle_request(pipeline, request),
            Err(err) => error_response(Value::Null, &format!("invalid request: {err}"), None),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

/// Run a single request and return the serialized response.
pub fn call<L, F>(pipeline: &Pipeline<L, F>, method: String, params_raw: &str, id_raw: &str) -> Result<String>
where
    L: Loader,
    F: SandboxFactory + Send + Sync + 'static,
{
    let params: Value = serde_json::from_str(params_raw).with_context(|| "parse params JSON")?;
    let id = parse_value(id_raw);
    let response = handle_request(pipeline, RpcRequest { id, method, params });
    Ok(serde_json::to_string(&response)?)
}

fn handle_request<L, F>(pipeline: &Pipeline<L, F>, req: RpcRequest) -> RpcResponse
where
    L: Loader,
    F: SandboxFactory + Send + Sync + 'static,
{
    let start = Instant::now();
    let result = handle_method(pipeline, &req.method, req.params);
    info!(method = %req.method, elapsed = ?start.elapsed(), ok = result.is_ok(), "request handled");

    match result {
        Ok(value) => RpcResponse {
            id: req.id,
            result: Some(value),
            error: None,
        },
        Err(err) => {
            let kind = err.downcast_ref::<ResolveError>().map(ResolveError::kind);
            error_response(req.id, &err.to_string(), kind)
        }
    }
}

pub fn handle_method<L, F>(pipeline: &Pipeline<L, F>, method: &str, params: Value) -> Result<Value>
where
    L: Loader,
    F: SandboxFactory + Send + Sync + 'static,
{
    let value = match method {
        "find_method" => {
            let request: ResolutionRequest = serde_json::from_value(params)?;
            json!(pipeline.find_single_method(&request)?)
        }
        "list_methods" => {
            let request: ResolutionRequest = serde_json::from_value(params)?;
            json!(pipeline.find_all_methods(&request)?)
        }
        "resolve_path" => {
            let params: PathParams = serde_json::from_value(params)?;
            let request = ResolutionRequest::parse_path(&params.path, pipeline.registry())?;
            if request.method.is_some() {
                json!(pipeline.find_single_method(&request)?)
            } else {
                json!(pipeline.find_all_methods(&request)?)
            }
        }
        "list_libraries" => {
            let registry = pipeline.registry();
            let libraries: Vec<Value> = registry
                .ids()
                .filter_map(|id| registry.get(id).filter(|hit| !hit.aliased).map(|hit| (id, hit)))
                .map(|(id, hit)| {
                    json!({
                        "id": id,
                        "name": hit.descriptor.name,
                        "default_version": hit.descriptor.default_version,
                        "versions": hit.descriptor.versions,
                    })
                })
                .collect();
            json!({ "libraries": libraries })
        }
        other => {
            return Err(anyhow::anyhow!("unknown method: {other}"));
        }
    };
    Ok(value)
}

fn error_response(id: Value, message: &str, kind: Option<&'static str>) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            message: message.to_string(),
            kind,
        }),
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
