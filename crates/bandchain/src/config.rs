//! Node configuration.

use std::time::Duration;

use bandchain_protocol::{CrawlConfig, SignatureConfig};

/// Configuration for a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Period of the pending-bytes flush.
    pub flush_interval: Duration,
    /// Period for expiring signature requests and stalled crawls.
    pub housekeeping_interval: Duration,
    /// Signature exchange configuration.
    pub signature: SignatureConfig,
    /// Crawl configuration.
    pub crawl: CrawlConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            housekeeping_interval: Duration::from_millis(250),
            signature: SignatureConfig::default(),
            crawl: CrawlConfig::default(),
        }
    }
}
