use clap::{Args, Subcommand};
use serde_json::{Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use vrm_core::tools::TOOLS;
use vrm_core::Envelope;

pub mod allowlist;
pub mod config;
pub mod dispatch;
pub mod download;
mod util;

pub use config::{ConfigError, DEFAULT_BASE_URL, TokenKind, VrmConfig};
pub use dispatch::{DispatchError, Dispatcher};
use util::to_pretty_json;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "vrm-mcp";

#[derive(Args, Clone, Debug)]
pub struct VrmArgs {
    /// VRM access token
    #[arg(long, env = "VRM_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// VRM API base URL
    #[arg(long, env = "VRM_API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
    /// Label sent before the token in X-Authorization
    #[arg(
        long,
        env = "VRM_TOKEN_KIND",
        value_enum,
        ignore_case = true,
        default_value_t = TokenKind::Token
    )]
    pub token_kind: TokenKind,
}

impl VrmArgs {
    pub fn into_config(self) -> Result<VrmConfig, ConfigError> {
        VrmConfig::new(self.token, Some(self.base_url), self.token_kind)
    }
}

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the VRM MCP server over stdio
    Serve,
    /// Print the tool catalog with input schemas
    Tools,
    /// Invoke a single tool and print its envelope
    Call(McpCallArgs),
}

#[derive(Args, Clone, Debug)]
pub struct McpCallArgs {
    /// Tool name (e.g. vrm_get_user_me)
    pub tool: String,
    /// Tool arguments as a JSON object
    #[arg(long, default_value = "{}")]
    pub args: String,
}

pub async fn run(vrm: VrmArgs, command: McpCommands) -> i32 {
    match command {
        McpCommands::Tools => {
            println!("{}", to_pretty_json(&tools_catalog()));
            0
        }
        McpCommands::Serve => {
            let dispatcher = match build_dispatcher(vrm) {
                Ok(dispatcher) => dispatcher,
                Err(code) => return code,
            };
            let server = McpServer::new(dispatcher);
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    tracing::error!(error = %err, "MCP server stopped");
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Call(call) => {
            let args: Value = match serde_json::from_str(&call.args) {
                Ok(args) => args,
                Err(err) => {
                    let payload = json!({
                        "error": "invalid_arguments",
                        "message": format!("--args must be JSON: {err}"),
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    return 1;
                }
            };
            let dispatcher = match build_dispatcher(vrm) {
                Ok(dispatcher) => dispatcher,
                Err(code) => return code,
            };
            match dispatcher.call(&call.tool, &args).await {
                Ok(envelope) => {
                    println!("{}", to_pretty_json(&envelope.to_value()));
                    if envelope.ok { 0 } else { 2 }
                }
                Err(err) => {
                    let envelope = Envelope::tool_error(err.path(), err.to_string());
                    eprintln!("{}", to_pretty_json(&envelope.to_value()));
                    1
                }
            }
        }
    }
}

fn build_dispatcher(vrm: VrmArgs) -> Result<Dispatcher, i32> {
    match vrm.into_config() {
        Ok(config) => {
            tracing::info!(
                base_url = config.base_url(),
                token_kind = %config.token_kind(),
                "VRM configuration loaded"
            );
            Ok(Dispatcher::new(config))
        }
        Err(err) => {
            tracing::error!(error = %err, "invalid VRM configuration");
            let payload = json!({
                "error": "config_error",
                "message": err.to_string(),
            });
            eprintln!("{}", to_pretty_json(&payload));
            Err(1)
        }
    }
}

/// Name, description and input schema of every tool.
pub fn tools_catalog() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema(),
            })
        })
        .collect();
    Value::Array(tools)
}

pub struct McpServer {
    dispatcher: Dispatcher,
}

impl McpServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn serve_stdio(&self) -> Result<(), String> {
        tracing::info!(
            server = MCP_SERVER_NAME,
            tools = TOOLS.len(),
            "serving MCP over stdio"
        );
        let mut reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(&mut reader, &mut stdout).await?;
        tracing::info!("stdin closed, shutting down");
        Ok(())
    }

    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let incoming = read_message(reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some((incoming, framing)) = incoming else {
                break;
            };

            let responses = match incoming {
                Incoming::Message(value) => self.handle_incoming_message(value).await,
                Incoming::Malformed(reason) => {
                    vec![error_response(Value::Null, RpcError::parse_error(reason))]
                }
            };
            for response in responses {
                write_message(writer, &response, framing)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }
        Ok(())
    }

    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Client responses; the server never issues requests of its own.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        // Requests carry an id, notifications do not and get no reply.
        let id = obj.get("id").cloned()?;
        let result = self.handle_request(method, params).await;
        Some(match result {
            Ok(payload) => success_response(id, payload),
            Err(err) => error_response(id, err),
        })
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tools_catalog() })),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        let envelope = match self.dispatcher.call(name, &args).await {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::error!(tool = name, error = %err, "tool dispatch raised");
                Envelope::tool_error(err.path(), err.to_string())
            }
        };
        Ok(build_tool_call_response(&envelope))
    }
}

fn initialize_payload() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "instructions": "Read-only access to the Victron VRM monitoring API. Start with vrm_list_installations to find a siteId, then use the installation and widget tools. Every result is an envelope with ok, data, meta and, on failure, error.code."
    })
}

fn build_tool_call_response(envelope: &Envelope) -> Value {
    let structured = envelope.to_value();
    let text = to_pretty_json(&structured);
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": structured,
        "isError": !envelope.ok
    })
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

/// How a message arrived; the reply uses the same framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    ContentLength,
    Line,
}

#[derive(Debug)]
enum Incoming {
    Message(Value),
    Malformed(String),
}

async fn read_message<R>(reader: &mut R) -> Result<Option<(Incoming, Framing)>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut in_headers = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if !in_headers {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        let trimmed = line.trim();
        if !in_headers {
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                let incoming = match serde_json::from_str(trimmed) {
                    Ok(value) => Incoming::Message(value),
                    Err(e) => Incoming::Malformed(format!("Invalid JSON payload: {e}")),
                };
                return Ok(Some((incoming, Framing::Line)));
            }
            in_headers = true;
        }

        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value.trim().parse::<usize>().map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "Invalid Content-Length header",
                    )
                })?;
                content_length = Some(parsed);
            }
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let incoming = match serde_json::from_slice(&payload) {
        Ok(value) => Incoming::Message(value),
        Err(e) => Incoming::Malformed(format!("Invalid JSON payload: {e}")),
    };
    Ok(Some((incoming, Framing::ContentLength)))
}

async fn write_message<W>(writer: &mut W, value: &Value, framing: Framing) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        Framing::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
