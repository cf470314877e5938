//! Connection broker: where call parameters (endpoint, tags, key, codec
//! config) come from.

use std::time::Duration;

use serde::Deserialize;

use callbench_common::ids::call_nonce;
use callbench_common::{CallbenchError, Result};

use crate::config::BrokerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerTags {
    pub caller: String,
    pub callee: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
    pub peer_tags: PeerTags,
}

impl Endpoint {
    pub fn address(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }
}

/// Parameters for one call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallParams {
    pub config: serde_json::Value,
    pub encryption_key: String,
    pub endpoints: Vec<Endpoint>,
}

impl CallParams {
    /// The endpoint both peers connect to.
    pub fn primary_endpoint(&self) -> Result<&Endpoint> {
        self.endpoints
            .first()
            .ok_or_else(|| CallbenchError::Provider("response lists no endpoints".into()))
    }

    /// Codec config as written for the peers.
    pub fn config_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.config)
            .map_err(|e| CallbenchError::Provider(format!("unserializable config: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct BrokerResponse {
    #[serde(default)]
    ok: bool,
    result: Option<CallParams>,
    description: Option<String>,
}

impl BrokerResponse {
    fn into_params(self) -> Result<CallParams> {
        if !self.ok {
            return Err(CallbenchError::Provider(
                self.description
                    .unwrap_or_else(|| "broker reported failure".into()),
            ));
        }
        let params = self
            .result
            .ok_or_else(|| CallbenchError::Provider("ok response without result".into()))?;
        params.primary_endpoint()?;
        Ok(params)
    }
}

/// Parses a `getConnection` response body.
pub fn parse_response(body: &str) -> Result<CallParams> {
    serde_json::from_str::<BrokerResponse>(body)
        .map_err(|e| CallbenchError::Provider(format!("malformed response: {e}")))?
        .into_params()
}

pub trait ConnectionBroker: Send {
    fn fetch(&mut self) -> Result<CallParams>;
}

// ── HTTP ────────────────────────────────────────────────────────────

/// Queries `{base_url}{token}/getConnection?call={nonce}`.
pub struct HttpBroker {
    base_url: String,
    token: String,
    agent: ureq::Agent,
}

impl HttpBroker {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self::with_agent(base_url, token, agent)
    }

    /// Uses a caller-configured agent (proxy, TLS, timeouts).
    pub fn with_agent(base_url: &str, token: &str, agent: ureq::Agent) -> Self {
        Self {
            base_url: base_url.to_string(),
            token: token.to_string(),
            agent,
        }
    }

    fn url(&self, nonce: &str) -> String {
        format!("{}{}/getConnection?call={}", self.base_url, self.token, nonce)
    }
}

impl ConnectionBroker for HttpBroker {
    fn fetch(&mut self) -> Result<CallParams> {
        let url = self.url(&call_nonce());
        // The token is part of the path; keep it out of the logs.
        tracing::debug!(base_url = %self.base_url, "querying connection broker");
        let mut resp = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| CallbenchError::Provider(format!("broker request failed: {e}")))?;
        resp.body_mut()
            .read_json::<BrokerResponse>()
            .map_err(|e| CallbenchError::Provider(format!("malformed response: {e}")))?
            .into_params()
    }
}

// ── Static ──────────────────────────────────────────────────────────

/// Fixed parameters for a lab reflector.
pub struct StaticBroker {
    params: CallParams,
}

impl StaticBroker {
    pub fn new(params: CallParams) -> Self {
        Self { params }
    }

    /// `endpoint` is `ip:port`.
    pub fn from_parts(
        endpoint: &str,
        caller_tag: &str,
        callee_tag: &str,
        encryption_key: &str,
        config: serde_json::Value,
    ) -> Result<Self> {
        let (ip, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| CallbenchError::Config(format!("endpoint {endpoint:?} lacks a port")))?;
        let port = port
            .parse()
            .map_err(|_| CallbenchError::Config(format!("bad port in endpoint {endpoint:?}")))?;
        Ok(Self::new(CallParams {
            config,
            encryption_key: encryption_key.to_string(),
            endpoints: vec![Endpoint {
                ip: ip.trim_start_matches('[').trim_end_matches(']').to_string(),
                port,
                peer_tags: PeerTags {
                    caller: caller_tag.to_string(),
                    callee: callee_tag.to_string(),
                },
            }],
        }))
    }
}

impl ConnectionBroker for StaticBroker {
    fn fetch(&mut self) -> Result<CallParams> {
        Ok(self.params.clone())
    }
}

pub fn from_config(cfg: &BrokerConfig) -> Result<Box<dyn ConnectionBroker>> {
    Ok(match cfg {
        BrokerConfig::Http {
            base_url,
            token,
            timeout,
        } => Box::new(HttpBroker::new(base_url, token, *timeout)),
        BrokerConfig::Static {
            endpoint,
            caller_tag,
            callee_tag,
            encryption_key,
            config,
        } => Box::new(StaticBroker::from_parts(
            endpoint,
            caller_tag,
            callee_tag,
            encryption_key,
            config.clone(),
        )?),
    })
}
