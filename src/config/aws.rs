//! AWS configuration for SigV4-signed data sources
//!
//! Data sources that authenticate with a named profile or the default
//! provider chain get their credentials from the AWS SDK config loader.
//! Static keys never go through here.

use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;

/// AWS configuration builder
///
/// Creates AWS SDK configuration with support for:
/// - An explicit region (the data source's signing region)
/// - Named profiles from the shared config files
/// - The default credential chain (env vars, web identity, instance profile, ...)
#[derive(Debug, Clone)]
pub struct AwsConfigBuilder {
    region: String,
    profile: Option<String>,
}

impl AwsConfigBuilder {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            profile: None,
        }
    }

    /// Load credentials from a named profile instead of the default chain
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Build the AWS SDK configuration
    pub async fn build_sdk_config(&self) -> SdkConfig {
        let region_provider =
            RegionProviderChain::first_try(Region::new(self.region.clone())).or_default_provider();

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
        if let Some(profile) = &self.profile {
            tracing::debug!(profile = %profile, "Loading AWS credentials from named profile");
            loader = loader.profile_name(profile);
        }
        loader.load().await
    }

    /// Resolve the credentials provider, if the environment offers one
    pub async fn credentials_provider(&self) -> Option<SharedCredentialsProvider> {
        self.build_sdk_config().await.credentials_provider()
    }
}
