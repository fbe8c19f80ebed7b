//! Authoritative name lookups against the on-chain registry.

use crate::abi::{decode_addr_return, decode_name_return, encode_resolve_addr, encode_resolve_name};
use crate::config::{ConfigError, RpcConfig};
use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// Read path of the name registry. Implementations report transport failures as errors and
/// "no such binding" as `Ok(None)`.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve_name(&self, addr: Address) -> anyhow::Result<Option<String>>;
    async fn resolve_addr(&self, name: &str) -> anyhow::Result<Option<Address>>;
}

/// Resolver for deployments without RPC access: nothing resolves beyond observed events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl NameResolver for NoopResolver {
    async fn resolve_name(&self, _addr: Address) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn resolve_addr(&self, _name: &str) -> anyhow::Result<Option<Address>> {
        Ok(None)
    }
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
}

async fn http_json_rpc(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Value,
    id: u64,
) -> Result<Value, ResolverError> {
    let body = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    });
    let resp = client.post(url).json(&body).send().await?;
    let resp = resp.error_for_status()?;
    let json: Value = resp.json().await?;
    if let Some(err) = json.get("error") {
        return Err(ResolverError::Rpc(err.to_string()));
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| ResolverError::Decode("Missing result".into()))
}

async fn eth_call(
    client: &reqwest::Client,
    http_url: &str,
    to: &Address,
    calldata: &[u8],
) -> Result<Vec<u8>, ResolverError> {
    let params = json!([{
        "to": format!("0x{}", hex::encode(to.as_slice())),
        "data": format!("0x{}", hex::encode(calldata)),
    }, "latest"]);
    let result = http_json_rpc(client, http_url, "eth_call", params, 1).await?;
    let s = result
        .as_str()
        .ok_or_else(|| ResolverError::Decode("eth_call result not string".into()))?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| ResolverError::Decode(e.to_string()))
}

/// `eth_call` against the registry contract over HTTP JSON-RPC.
pub struct RpcNameResolver {
    client: reqwest::Client,
    http_url: String,
    registry: Address,
}

impl RpcNameResolver {
    pub fn new(config: &RpcConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self {
            client,
            http_url: config.http_url.clone(),
            registry: config.registry()?,
        })
    }

    pub fn registry(&self) -> Address {
        self.registry
    }
}

#[async_trait]
impl NameResolver for RpcNameResolver {
    async fn resolve_name(&self, addr: Address) -> anyhow::Result<Option<String>> {
        let data = eth_call(
            &self.client,
            &self.http_url,
            &self.registry,
            &encode_resolve_name(&addr),
        )
        .await?;
        decode_name_return(&data)
    }

    async fn resolve_addr(&self, name: &str) -> anyhow::Result<Option<Address>> {
        let calldata = encode_resolve_addr(name)?;
        let data = eth_call(&self.client, &self.http_url, &self.registry, &calldata).await?;
        decode_addr_return(&data)
    }
}
