//! Redpanda health checks.

use crate::config::BrokerConfig;
use crate::connection::connect;
use tracing::{debug, error};

/// Check Redpanda connection health.
pub async fn check_connection(config: &BrokerConfig) -> bool {
    let client = match connect(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Broker health check failed: {}", e);
            return false;
        }
    };

    // Listing topics verifies the connection end to end.
    match client.list_topics().await {
        Ok(topics) => {
            debug!(topics = topics.len(), "Broker connection healthy");
            true
        }
        Err(e) => {
            error!("Failed to list broker topics: {}", e);
            false
        }
    }
}
