//! Many user records in one round trip.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use courier_shared::constants::AUTH_BATCH_DETAILS_REQUEST;
use courier_shared::rpc::{BatchDetailsRequest, BatchDetailsResponse, UserDetails};
use courier_shared::UserId;

use crate::error::RpcError;
use crate::rpc::RpcClient;

/// Result of a batch lookup. Ids the auth service did not know are listed in
/// `missing` rather than failing the whole call.
#[derive(Debug, Clone, Default)]
pub struct DetailsBatch {
    pub details: HashMap<UserId, UserDetails>,
    pub missing: HashSet<UserId>,
}

impl DetailsBatch {
    pub fn get(&self, id: &UserId) -> Option<&UserDetails> {
        self.details.get(id)
    }

    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}

pub struct BatchDetailFetcher {
    rpc: Arc<RpcClient>,
    request_queue: String,
}

impl BatchDetailFetcher {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            request_queue: AUTH_BATCH_DETAILS_REQUEST.to_string(),
        }
    }

    pub async fn fetch_details<I>(&self, ids: I) -> Result<DetailsBatch, RpcError>
    where
        I: IntoIterator<Item = UserId>,
    {
        let wanted: BTreeSet<UserId> = ids.into_iter().collect();
        if wanted.is_empty() {
            return Ok(DetailsBatch::default());
        }

        let request = BatchDetailsRequest {
            user_ids: wanted.iter().copied().collect(),
        };
        let mut response: BatchDetailsResponse = self.rpc.call(&self.request_queue, &request).await?;

        let mut batch = DetailsBatch::default();
        for id in wanted {
            match response.user_details.remove(&id.to_string()) {
                Some(details) => {
                    batch.details.insert(id, details);
                }
                None => {
                    batch.missing.insert(id);
                }
            }
        }

        if batch.is_partial() {
            tracing::warn!(missing = batch.missing.len(), "batch details incomplete");
        }
        Ok(batch)
    }
}
