//! AWS configuration shared by the CloudWatch adapters.

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, SdkConfig};

use crate::config::DEFAULT_REGION;

/// Loaded once at startup; clients are built from it per call.
pub struct AppState {
    pub aws_config: SdkConfig,
    pub region: String,
}

impl AppState {
    /// Resolve credentials and region with the default provider chains,
    /// falling back to the fixed sample region.
    pub async fn new() -> Self {
        let region_provider = RegionProviderChain::default_provider().or_else(DEFAULT_REGION);
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        let region = aws_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Self { aws_config, region }
    }
}
