//! GraphQL client for the staking subgraph.
//!
//! Queries are POSTed as `{ "query", "variables" }`; the response envelope
//! `{ "data", "errors" }` is unwrapped into typed results.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use staking_types::{Result, StakingError};

pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

pub const BLOCKS_QUERY: &str = r#"query blocks(
    $first: Int
    $where: Block_filter
    $orderBy: Block_orderBy
    $orderDirection: OrderDirection
) {
    blocks(
        first: $first
        where: $where
        orderBy: $orderBy
        orderDirection: $orderDirection
    ) {
        id
        number
        timestamp
        reward
        difficulty
        chain {
            id
        }
        producer {
            id
        }
        node {
            id
        }
    }
}"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

/// Entity reference carrying only its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
}

/// A block produced by a staked node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(deserialize_with = "u64_from_any")]
    pub number: u64,
    #[serde(deserialize_with = "u64_from_any")]
    pub timestamp: u64,
    /// CTSI base units, as a decimal string.
    pub reward: String,
    pub difficulty: String,
    pub chain: EntityRef,
    pub producer: EntityRef,
    pub node: EntityRef,
}

#[derive(Debug, Deserialize)]
struct BlocksData {
    blocks: Vec<Block>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// Filter on the `Block_filter` input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

/// Variables of the blocks query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocksQuery {
    pub first: u32,
    #[serde(rename = "where")]
    pub filter: BlockFilter,
    pub order_by: String,
    pub order_direction: OrderDirection,
}

impl Default for BlocksQuery {
    fn default() -> Self {
        Self {
            first: 10,
            filter: BlockFilter::default(),
            order_by: "timestamp".to_string(),
            order_direction: OrderDirection::Desc,
        }
    }
}

/// Subgraph numbers arrive as JSON numbers or, for `BigInt`, strings.
fn u64_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid number {}", n))),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("expected number, got {}", other))),
    }
}

/// Build the JSON body of a GraphQL request.
pub fn request_body(query: &str, variables: Value) -> Value {
    json!({ "query": query, "variables": variables })
}

/// Unwrap a GraphQL response envelope.
pub fn parse_response<T: DeserializeOwned>(body: Value) -> Result<T> {
    let response: GraphQlResponse<T> = serde_json::from_value(body)
        .map_err(|e| StakingError::Indexer(format!("failed to parse response: {}", e)))?;

    if !response.errors.is_empty() {
        let messages: Vec<_> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(StakingError::Indexer(messages.join("; ")));
    }
    response
        .data
        .ok_or_else(|| StakingError::Indexer("response has no data".to_string()))
}

/// Staking subgraph client.
pub struct IndexerClient {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl IndexerClient {
    pub fn new(url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        Self {
            url: url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run a query and deserialize its `data`.
    pub async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&request_body(query, variables))
            .send()
            .await
            .map_err(|e| StakingError::Indexer(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(StakingError::Indexer(format!(
                "indexer returned status {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| StakingError::Indexer(format!("failed to read response: {}", e)))?;
        parse_response(body)
    }

    /// Latest blocks matching `query`.
    pub async fn blocks(&self, query: &BlocksQuery) -> Result<Vec<Block>> {
        let variables = serde_json::to_value(query)
            .map_err(|e| StakingError::Indexer(format!("invalid variables: {}", e)))?;
        let data: BlocksData = self.query(BLOCKS_QUERY, variables).await?;
        tracing::debug!(count = data.blocks.len(), "fetched blocks");
        Ok(data.blocks)
    }
}
