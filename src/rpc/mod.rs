/// RPC Client Module
///
/// Talks to an Antelope node's chain API. The tracker only needs `get_info`:
/// it validates the endpoint at startup and reports head and last
/// irreversible block.
use std::time::Duration;

use crate::error::Result;
use crate::models::ChainInfo;

pub struct ChainApiClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ChainApiClient {
    /// Create a new client for the node at `endpoint`
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self { client, endpoint: endpoint.trim_end_matches('/').to_string() })
    }

    /// Get the endpoint URL this client is connected to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the node's current chain state
    pub async fn get_info(&self) -> Result<ChainInfo> {
        let info = self
            .client
            .post(self.url("/v1/chain/get_info"))
            .send()
            .await?
            .error_for_status()?
            .json::<ChainInfo>()
            .await?;

        tracing::debug!("get_info: head {} lib {}", info.head_block_num, info.last_irreversible_block_num);
        Ok(info)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}
