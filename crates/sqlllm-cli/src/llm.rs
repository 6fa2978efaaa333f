//! Generation backends for the CLI: Ollama, OpenAI, Anthropic and an external
//! command plugin.
//!
//! All of them are blocking and send the prompt as a single user message.

use std::path::PathBuf;
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlllm_core::{GenerationBackend, GenerationError};
use tracing::debug;

pub(crate) const SQLLLM_LLM_TIMEOUT_SECS_ENV: &str = "SQLLLM_LLM_TIMEOUT_SECS";
pub(crate) const SQLLLM_LLM_MAX_OUTPUT_TOKENS_ENV: &str = "SQLLLM_LLM_MAX_OUTPUT_TOKENS";
pub(crate) const SQLLLM_MODEL_ENV: &str = "SQLLLM_MODEL";
pub(crate) const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
pub(crate) const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub(crate) const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub(crate) const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";
pub(crate) const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub(crate) const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub(crate) const ANTHROPIC_MODEL_ENV: &str = "ANTHROPIC_MODEL";
pub(crate) const ANTHROPIC_VERSION_ENV: &str = "ANTHROPIC_VERSION";

// Local models on modest hardware can take a while per completion.
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
// A single SQL statement rarely needs more.
const DEFAULT_LLM_MAX_OUTPUT_TOKENS: u32 = 500;

const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) const PLUGIN_PROTOCOL_V1: &str = "sqlllm_generate_v1";

// =============================================================================
// Configuration
// =============================================================================

/// Resolve the per-call LLM timeout.
///
/// Precedence:
/// 1) explicit override (`--timeout-secs`)
/// 2) env var `SQLLLM_LLM_TIMEOUT_SECS`
/// 3) default (`DEFAULT_LLM_TIMEOUT_SECS`)
///
/// `0` disables the timeout (wait forever).
pub(crate) fn llm_timeout(timeout_secs_override: Option<u64>) -> Result<Option<Duration>> {
    let secs = match timeout_secs_override {
        Some(v) => v,
        None => match std::env::var(SQLLLM_LLM_TIMEOUT_SECS_ENV) {
            Ok(v) => {
                let v = v.trim();
                if v.is_empty() {
                    DEFAULT_LLM_TIMEOUT_SECS
                } else {
                    v.parse::<u64>().map_err(|_| {
                        anyhow!(
                            "invalid {SQLLLM_LLM_TIMEOUT_SECS_ENV}={v:?} (expected integer seconds; 0 disables)"
                        )
                    })?
                }
            }
            Err(std::env::VarError::NotPresent) => DEFAULT_LLM_TIMEOUT_SECS,
            Err(e) => return Err(anyhow!("failed to read {SQLLLM_LLM_TIMEOUT_SECS_ENV}: {e}")),
        },
    };

    Ok(if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    })
}

pub(crate) fn llm_max_output_tokens() -> Result<u32> {
    match std::env::var(SQLLLM_LLM_MAX_OUTPUT_TOKENS_ENV) {
        Ok(v) => parse_max_output_tokens(&v),
        Err(std::env::VarError::NotPresent) => Ok(DEFAULT_LLM_MAX_OUTPUT_TOKENS),
        Err(e) => Err(anyhow!(
            "failed to read {SQLLLM_LLM_MAX_OUTPUT_TOKENS_ENV}: {e}"
        )),
    }
}

fn parse_max_output_tokens(v: &str) -> Result<u32> {
    let v = v.trim();
    if v.is_empty() {
        return Ok(DEFAULT_LLM_MAX_OUTPUT_TOKENS);
    }
    let parsed = v.parse::<u32>().map_err(|_| {
        anyhow!("invalid {SQLLLM_LLM_MAX_OUTPUT_TOKENS_ENV}={v:?} (expected integer tokens, e.g. 500)")
    })?;
    Ok(if parsed == 0 { DEFAULT_LLM_MAX_OUTPUT_TOKENS } else { parsed })
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Base URL for an HTTP backend: the `--llm-host` flag, then `env`, then
/// `default`. A bare `host:port` gets `scheme://`; trailing slashes go.
fn resolve_base_url(flag: Option<&str>, env: &str, default: &str, scheme: &str) -> String {
    let url = flag
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| env_nonempty(env))
        .unwrap_or_else(|| default.to_string());
    let url = url.trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{scheme}://{url}")
    }
}

#[cfg(feature = "llm-anthropic")]
fn default_anthropic_version() -> String {
    env_nonempty(ANTHROPIC_VERSION_ENV).unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Ollama,
    Openai,
    Anthropic,
    Command,
}

/// Backend selection flags shared by `ask` and `bench`.
#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// Which LLM backend generates the SQL.
    #[arg(long, value_enum, default_value_t = BackendKind::Ollama)]
    pub backend: BackendKind,

    /// Model name (default: backend-specific env var, then `SQLLLM_MODEL`).
    #[arg(long)]
    pub model: Option<String>,

    /// Base URL of the HTTP backend (default: `OLLAMA_HOST`, `OPENAI_BASE_URL`
    /// or `ANTHROPIC_BASE_URL`).
    #[arg(long)]
    pub llm_host: Option<String>,

    /// Program speaking `sqlllm_generate_v1` on stdin/stdout (`--backend command`).
    #[arg(long)]
    pub plugin: Option<PathBuf>,

    /// Extra argument for the plugin program (repeatable).
    #[arg(long = "plugin-arg", allow_hyphen_values = true)]
    pub plugin_args: Vec<String>,

    /// Per-call timeout in seconds; 0 waits forever (default: `SQLLLM_LLM_TIMEOUT_SECS` or 120).
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    /// Local Ollama server, native `/api/chat` endpoint.
    Ollama { host: String },
    /// OpenAI Responses API. Needs `OPENAI_API_KEY`.
    OpenAI { base_url: String },
    /// Anthropic Messages API. Needs `ANTHROPIC_API_KEY`.
    Anthropic { base_url: String },
    /// External command plugin that speaks `sqlllm_generate_v1` over
    /// stdin/stdout JSON.
    Command { program: PathBuf, args: Vec<String> },
}

/// A configured backend, created once per process and lent to the generation
/// loop.
#[derive(Debug, Clone)]
pub struct LlmClient {
    pub backend: LlmBackend,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
    pub max_output_tokens: u32,
}

impl LlmClient {
    pub fn from_args(args: &BackendArgs) -> Result<Self> {
        let timeout = llm_timeout(args.timeout_secs)?;
        let max_output_tokens = llm_max_output_tokens()?;
        let host = args.llm_host.as_deref();

        let (backend, model) = match args.backend {
            BackendKind::Ollama => {
                // IPv4 loopback; `localhost` may resolve to ::1 where Ollama is not listening.
                let host = resolve_base_url(host, OLLAMA_HOST_ENV, DEFAULT_OLLAMA_HOST, "http");
                let model = args.model.clone().or_else(|| env_nonempty(SQLLLM_MODEL_ENV));
                if model.is_none() {
                    return Err(anyhow!(
                        "no model selected (pass `--model <ollama_model>` or set {SQLLLM_MODEL_ENV}; e.g. `--model llama3.2`)"
                    ));
                }
                (LlmBackend::Ollama { host }, model)
            }
            BackendKind::Openai => {
                let base_url =
                    resolve_base_url(host, OPENAI_BASE_URL_ENV, DEFAULT_OPENAI_BASE_URL, "https");
                let model = args
                    .model
                    .clone()
                    .or_else(|| env_nonempty(OPENAI_MODEL_ENV))
                    .or_else(|| env_nonempty(SQLLLM_MODEL_ENV));
                if model.is_none() {
                    return Err(anyhow!(
                        "no model selected (pass `--model <openai_model>` or set {OPENAI_MODEL_ENV})"
                    ));
                }
                (LlmBackend::OpenAI { base_url }, model)
            }
            BackendKind::Anthropic => {
                let base_url = resolve_base_url(
                    host,
                    ANTHROPIC_BASE_URL_ENV,
                    DEFAULT_ANTHROPIC_BASE_URL,
                    "https",
                );
                let model = args
                    .model
                    .clone()
                    .or_else(|| env_nonempty(ANTHROPIC_MODEL_ENV))
                    .or_else(|| env_nonempty(SQLLLM_MODEL_ENV));
                if model.is_none() {
                    return Err(anyhow!(
                        "no model selected (pass `--model <anthropic_model>` or set {ANTHROPIC_MODEL_ENV})"
                    ));
                }
                (LlmBackend::Anthropic { base_url }, model)
            }
            BackendKind::Command => {
                let Some(program) = args.plugin.clone() else {
                    return Err(anyhow!("`--backend command` requires `--plugin <program>`"));
                };
                let model = args.model.clone().or_else(|| env_nonempty(SQLLLM_MODEL_ENV));
                (
                    LlmBackend::Command {
                        program,
                        args: args.plugin_args.clone(),
                    },
                    model,
                )
            }
        };

        Ok(Self {
            backend,
            model,
            timeout,
            max_output_tokens,
        })
    }

    pub fn status_line(&self) -> String {
        let backend = match &self.backend {
            LlmBackend::Ollama { host } => format!("ollama({host})"),
            LlmBackend::OpenAI { base_url } => format!("openai({base_url})"),
            LlmBackend::Anthropic { base_url } => format!("anthropic({base_url})"),
            LlmBackend::Command { program, .. } => format!("command({})", program.display()),
        };
        let model = self.model.as_deref().unwrap_or("(none)");
        let timeout = match self.timeout {
            Some(t) => format!("{}s", t.as_secs()),
            None => "none".to_string(),
        };
        format!("llm: backend={backend} model={model} timeout={timeout}")
    }

    fn model(&self) -> Result<&str, GenerationError> {
        self.model
            .as_deref()
            .ok_or_else(|| GenerationError::Config("no model selected".to_string()))
    }
}

impl GenerationBackend for LlmClient {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        debug!(backend = %self.status_line(), prompt_chars = prompt.len(), "llm call");
        match &self.backend {
            #[cfg(feature = "llm-ollama")]
            LlmBackend::Ollama { host } => ollama_chat_with_timeout(
                host,
                self.model()?,
                prompt,
                self.max_output_tokens,
                self.timeout,
            ),
            #[cfg(feature = "llm-openai")]
            LlmBackend::OpenAI { base_url } => {
                let key = api_key(OPENAI_API_KEY_ENV, "OpenAI")?;
                openai_responses_with_timeout(
                    base_url,
                    &key,
                    self.model()?,
                    prompt,
                    self.max_output_tokens,
                    self.timeout,
                )
            }
            #[cfg(feature = "llm-anthropic")]
            LlmBackend::Anthropic { base_url } => {
                let key = api_key(ANTHROPIC_API_KEY_ENV, "Anthropic")?;
                anthropic_messages_with_timeout(
                    base_url,
                    &key,
                    self.model()?,
                    prompt,
                    self.max_output_tokens,
                    self.timeout,
                )
            }
            LlmBackend::Command { program, args } => {
                let request = PluginRequestV1 {
                    protocol: PLUGIN_PROTOCOL_V1.to_string(),
                    model: self.model.clone(),
                    prompt: prompt.to_string(),
                    max_output_tokens: self.max_output_tokens,
                };
                let response = run_plugin(program, args, &request, self.timeout)?;
                if let Some(err) = response.error {
                    return Err(GenerationError::Api(format!("llm plugin error: {err}")));
                }
                response.text.ok_or_else(|| {
                    GenerationError::InvalidResponse("llm plugin returned no `text`".to_string())
                })
            }
            #[allow(unreachable_patterns)]
            other => Err(GenerationError::Config(format!(
                "backend {other:?} is not compiled into this binary"
            ))),
        }
    }

    fn describe(&self) -> String {
        self.status_line()
    }
}

#[cfg(any(feature = "llm-openai", feature = "llm-anthropic"))]
fn api_key(env: &str, provider: &str) -> Result<String, GenerationError> {
    env_nonempty(env).ok_or_else(|| {
        GenerationError::Config(format!(
            "{provider} backend requires {env} (set it in your env; do not hardcode secrets in scripts)"
        ))
    })
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
fn http_client(timeout: Option<Duration>) -> Result<reqwest::blocking::Client, GenerationError> {
    let mut builder = reqwest::blocking::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| GenerationError::Config(format!("failed to build http client: {e}")))
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
fn send_error(e: reqwest::Error, what: &str) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout(format!(
            "{what}: {e} (raise {SQLLLM_LLM_TIMEOUT_SECS_ENV} or set it to 0 to disable)"
        ))
    } else {
        GenerationError::Network(format!("{what}: {e}"))
    }
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
fn read_json(
    resp: reqwest::blocking::Response,
    provider: &str,
) -> Result<serde_json::Value, GenerationError> {
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        return Err(GenerationError::Api(format!("{provider} http error {status}: {text}")));
    }
    resp.json().map_err(|e| {
        GenerationError::InvalidResponse(format!("{provider} returned invalid JSON: {e}"))
    })
}

// =============================================================================
// Ollama backend
// =============================================================================

#[cfg(feature = "llm-ollama")]
fn ollama_chat_with_timeout(
    host: &str,
    model: &str,
    user: &str,
    max_output_tokens: u32,
    timeout: Option<Duration>,
) -> Result<String, GenerationError> {
    let url = format!("{host}/api/chat");

    let body = json!({
        "model": model,
        "stream": false,
        "messages": [
            { "role": "user", "content": user }
        ],
        "options": {
            "temperature": 0,
            "num_predict": max_output_tokens
        }
    });

    let client = http_client(timeout)?;
    let resp = client.post(&url).json(&body).send().map_err(|e| {
        send_error(
            e,
            &format!("failed to reach ollama at {url} (is it running? try `ollama serve` or set {OLLAMA_HOST_ENV})"),
        )
    })?;
    let v = read_json(resp, "ollama")?;
    ollama_extract_output_text(&v).ok_or_else(|| {
        GenerationError::InvalidResponse("ollama: no message content in response".to_string())
    })
}

fn ollama_extract_output_text(v: &serde_json::Value) -> Option<String> {
    Some(v.get("message")?.get("content")?.as_str()?.to_string())
}

// =============================================================================
// OpenAI backend (Responses API)
// =============================================================================

fn has_type(v: &serde_json::Value, ty: &str) -> bool {
    v.get("type").and_then(|t| t.as_str()) == Some(ty)
}

fn join_texts<'a>(parts: impl Iterator<Item = &'a serde_json::Value>) -> Option<String> {
    let joined = parts
        .filter_map(|p| p.get("text")?.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let joined = joined.trim();
    (!joined.is_empty()).then(|| joined.to_string())
}

/// `output_text` parts of `message` items; reasoning items carry no answer.
fn openai_extract_output_text(v: &serde_json::Value) -> Option<String> {
    let parts = v
        .get("output")?
        .as_array()?
        .iter()
        .filter(|item| has_type(item, "message"))
        .filter_map(|item| item.get("content")?.as_array())
        .flatten()
        .filter(|part| has_type(part, "output_text"));
    join_texts(parts)
}

#[cfg(feature = "llm-openai")]
fn openai_responses_with_timeout(
    base_url: &str,
    api_key: &str,
    model: &str,
    user: &str,
    max_output_tokens: u32,
    timeout: Option<Duration>,
) -> Result<String, GenerationError> {
    let url = format!("{base_url}/v1/responses");

    let body = json!({
        "model": model,
        "input": user,
        "max_output_tokens": max_output_tokens
    });

    let client = http_client(timeout)?;
    let resp = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .map_err(|e| send_error(e, &format!("failed to reach OpenAI at {url}")))?;
    let v = read_json(resp, "openai")?;
    openai_extract_output_text(&v).ok_or_else(|| {
        GenerationError::InvalidResponse(
            "openai: no output_text in response (unexpected response shape)".to_string(),
        )
    })
}

// =============================================================================
// Anthropic backend (Messages API)
// =============================================================================

fn anthropic_extract_output_text(v: &serde_json::Value) -> Option<String> {
    join_texts(
        v.get("content")?
            .as_array()?
            .iter()
            .filter(|block| has_type(block, "text")),
    )
}

#[cfg(feature = "llm-anthropic")]
fn anthropic_messages_with_timeout(
    base_url: &str,
    api_key: &str,
    model: &str,
    user: &str,
    max_output_tokens: u32,
    timeout: Option<Duration>,
) -> Result<String, GenerationError> {
    let url = format!("{base_url}/v1/messages");

    let body = json!({
        "model": model,
        "max_tokens": max_output_tokens,
        "temperature": 0,
        "messages": [
            { "role": "user", "content": user }
        ]
    });

    let client = http_client(timeout)?;
    let resp = client
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", default_anthropic_version())
        .json(&body)
        .send()
        .map_err(|e| send_error(e, &format!("failed to reach Anthropic at {url}")))?;
    let v = read_json(resp, "anthropic")?;
    anthropic_extract_output_text(&v).ok_or_else(|| {
        GenerationError::InvalidResponse(
            "anthropic: no text blocks in response (unexpected response shape)".to_string(),
        )
    })
}

// =============================================================================
// Command plugin
// =============================================================================

#[derive(Debug, Serialize)]
struct PluginRequestV1 {
    protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    prompt: String,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct PluginResponseV1 {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Wait for a plugin process, reading its stdout and stderr while it runs so
/// a chatty child never blocks on a full pipe. Past `timeout` it is killed.
pub(crate) fn wait_with_output_timeout(
    mut child: Child,
    timeout: Option<Duration>,
    context: &str,
) -> Result<Output, GenerationError> {
    let Some(timeout) = timeout else {
        return child
            .wait_with_output()
            .map_err(|e| GenerationError::Api(format!("{context}: {e}")));
    };

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        let polled = child
            .try_wait()
            .map_err(|e| GenerationError::Api(format!("{context}: failed to poll child status: {e}")))?;
        if let Some(status) = polled {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            let stderr = stderr.join().unwrap_or_default();
            return Err(GenerationError::Timeout(format!(
                "{context}: timed out after {}s (set {SQLLLM_LLM_TIMEOUT_SECS_ENV}=0 to disable). stderr: {}",
                timeout.as_secs(),
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        thread::sleep(Duration::from_millis(50));
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn run_plugin(
    program: &PathBuf,
    args: &[String],
    request: &PluginRequestV1,
    timeout: Option<Duration>,
) -> Result<PluginResponseV1, GenerationError> {
    let payload = serde_json::to_vec(request)
        .map_err(|e| GenerationError::Config(format!("failed to encode plugin request: {e}")))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            GenerationError::Config(format!("failed to start llm plugin `{}`: {e}", program.display()))
        })?;

    {
        let Some(mut stdin) = child.stdin.take() else {
            return Err(GenerationError::Api("failed to open stdin for llm plugin".to_string()));
        };
        use std::io::Write;
        stdin.write_all(&payload).map_err(|e| {
            GenerationError::Api(format!("failed to write to llm plugin `{}`: {e}", program.display()))
        })?;
    }

    let out = wait_with_output_timeout(
        child,
        timeout,
        &format!("llm plugin `{}`", program.display()),
    )?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(GenerationError::Api(format!(
            "llm plugin `{}` failed (exit={:?}): {}",
            program.display(),
            out.status.code(),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8(out.stdout).map_err(|e| {
        GenerationError::InvalidResponse(format!(
            "llm plugin `{}` returned non-utf8 stdout: {e}",
            program.display()
        ))
    })?;
    let stdout = stdout.trim();
    serde_json::from_str(stdout).map_err(|e| {
        let preview = stdout.chars().take(300).collect::<String>();
        GenerationError::InvalidResponse(format!(
            "llm plugin `{}` returned invalid JSON: {e}; stdout starts with: {preview:?}",
            program.display()
        ))
    })
}
