use std::time::Duration;

use crate::group::{POLYLOGUE_LIMIT, QUERY_EXPIRES_MS, SECRET_GROUP_LIMIT};
use crate::types::NodeId;

/// Configuration for the group service and its runtime.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Groups at or above this size get the common assistants on creation.
    pub polylogue_limit: usize,
    /// Below this size, messages are split per member before encryption.
    pub secret_group_limit: usize,
    /// Minimum interval between two network queries for one group.
    pub query_expires: Duration,
    /// Relay that receives bulletins first and answers unknown-group queries.
    pub neighbor: Option<NodeId>,
    /// Bots declared as assistants for large groups.
    pub common_assistants: Vec<NodeId>,
    /// Capacity of the runtime's command and event channels.
    pub channel_capacity: usize,
    /// A bot that has not answered a forwarded message within this window
    /// is charged a failure.
    pub bot_response_timeout: Duration,
    /// Interval for runtime housekeeping (bot timeouts).
    pub maintenance_interval: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            polylogue_limit: POLYLOGUE_LIMIT,
            secret_group_limit: SECRET_GROUP_LIMIT,
            query_expires: Duration::from_millis(QUERY_EXPIRES_MS),
            neighbor: None,
            common_assistants: Vec::new(),
            channel_capacity: 64,
            bot_response_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(10),
        }
    }
}
