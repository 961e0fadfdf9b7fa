//! JSON-RPC over HTTP POST
//!
//! Both the chain node and the wallets speak the same JSON-RPC 1.0 dialect
//! with HTTP basic authentication. A client remembers whether its last
//! request reached the peer so the connection manager can decide when to
//! dial again.

use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Connection details for one RPC peer
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port`
    pub addr: String,
    pub user: String,
    pub pass: String,
    pub timeout: Duration,
    /// PEM certificate of the peer; switches the transport to https
    pub root_cert: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

pub struct JsonRpcClient {
    addr: String,
    url: String,
    user: String,
    pass: String,
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
    connected: AtomicBool,
}

impl JsonRpcClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        // Request deadlines are set per call so long-running methods can extend them
        let mut builder = reqwest::Client::builder().connect_timeout(config.timeout);

        let scheme = match &config.root_cert {
            Some(pem) => {
                let cert = reqwest::Certificate::from_pem(pem)
                    .map_err(|e| RpcError::connection(&config.addr, e))?;
                builder = builder.add_root_certificate(cert);
                "https"
            }
            None => "http",
        };

        let http = builder
            .build()
            .map_err(|e| RpcError::connection(&config.addr, e))?;

        Ok(Self {
            url: format!("{}://{}", scheme, config.addr),
            addr: config.addr,
            user: config.user,
            pass: config.pass,
            http,
            timeout: config.timeout,
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// False once a request failed to reach the peer
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn disconnected(&self, reason: impl ToString) -> RpcError {
        self.connected.store(false, Ordering::Relaxed);
        RpcError::connection(&self.addr, reason)
    }

    /// Call `method` and decode its result
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: &[Value]) -> Result<T> {
        self.call_with_timeout(method, params, self.timeout).await
    }

    /// Like [`JsonRpcClient::call`], for methods that only answer once their
    /// work is done and may outlive the configured timeout
    pub async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[Value],
        timeout: Duration,
    ) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(peer = %self.addr, method, id, timeout_secs = timeout.as_secs(), "rpc request");

        let request = Request {
            jsonrpc: "1.0",
            id,
            method,
            params,
        };

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.disconnected(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(self.disconnected("authentication failed"));
        }

        let body = response.bytes().await.map_err(|e| self.disconnected(e))?;
        let decoded: Response = match serde_json::from_slice(&body) {
            Ok(decoded) => decoded,
            Err(_) if !status.is_success() => {
                return Err(self.disconnected(format!("HTTP error: {}", status)));
            }
            Err(e) => return Err(RpcError::invalid_response(method, e)),
        };

        if let Some(error) = decoded.error {
            debug!(peer = %self.addr, method, code = error.code, "rpc error: {}", error.message);
            return Err(RpcError::Server {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(decoded.result.unwrap_or(Value::Null))
            .map_err(|e| RpcError::invalid_response(method, e))
    }
}
