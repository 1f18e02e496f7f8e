//! AWS SigV4 request signing for Amazon OpenSearch Service and Serverless

use super::credential::{AwsSigningSource, SigV4Service};
use super::error::{error_chain, DataSourceError};
use crate::config::aws::AwsConfigBuilder;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    sign, PayloadChecksumKind, SignableBody, SignableRequest, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use reqwest::header::{HeaderName, HeaderValue};
use std::fmt;
use std::time::SystemTime;
use tokio::sync::OnceCell;

enum SigningCredentials {
    Static(Credentials),
    /// Loaded lazily on first use, then cached; the provider refreshes itself
    Provider {
        config: AwsConfigBuilder,
        provider: OnceCell<SharedCredentialsProvider>,
    },
}

/// Signs outgoing requests for one region and service
pub struct SigV4Signer {
    region: String,
    service: SigV4Service,
    credentials: SigningCredentials,
}

impl fmt::Debug for SigV4Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigV4Signer")
            .field("region", &self.region)
            .field("service", &self.service)
            .finish()
    }
}

impl SigV4Signer {
    pub fn new(
        region: impl Into<String>,
        service: SigV4Service,
        source: &AwsSigningSource,
    ) -> Result<Self, DataSourceError> {
        if service == SigV4Service::Unsupported {
            return Err(DataSourceError::UnsupportedAuthType(
                "sigv4 service must be es or aoss".to_string(),
            ));
        }
        let region = region.into();
        let credentials = match source {
            AwsSigningSource::Static {
                access_key_id,
                secret_access_key,
                session_token,
            } => SigningCredentials::Static(Credentials::new(
                access_key_id.clone(),
                secret_access_key.expose().to_string(),
                session_token.as_ref().map(|t| t.expose().to_string()),
                None,
                "data-source-static",
            )),
            AwsSigningSource::Profile(name) => SigningCredentials::Provider {
                config: AwsConfigBuilder::new(region.clone()).with_profile(name.clone()),
                provider: OnceCell::new(),
            },
            AwsSigningSource::DefaultChain => SigningCredentials::Provider {
                config: AwsConfigBuilder::new(region.clone()),
                provider: OnceCell::new(),
            },
            AwsSigningSource::Unsupported => {
                return Err(DataSourceError::UnsupportedAuthType(
                    "unrecognized sigv4 credential source".to_string(),
                ))
            }
        };

        Ok(Self {
            region,
            service,
            credentials,
        })
    }

    async fn credentials(&self) -> Result<Credentials, DataSourceError> {
        match &self.credentials {
            SigningCredentials::Static(credentials) => Ok(credentials.clone()),
            SigningCredentials::Provider { config, provider } => {
                let provider = provider
                    .get_or_try_init(|| async {
                        config.credentials_provider().await.ok_or_else(|| {
                            DataSourceError::Signing(
                                "no AWS credentials provider available".to_string(),
                            )
                        })
                    })
                    .await?;
                provider
                    .provide_credentials()
                    .await
                    .map_err(|e| DataSourceError::Signing(error_chain(&e)))
            }
        }
    }

    /// Add the SigV4 headers to a fully built request
    pub async fn sign(&self, request: &mut reqwest::Request) -> Result<(), DataSourceError> {
        let identity: Identity = self.credentials().await?.into();

        let mut settings = SigningSettings::default();
        if self.service == SigV4Service::Aoss {
            settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        }

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(self.service.as_str())
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|e| DataSourceError::Signing(e.to_string()))?
            .into();

        let headers: Vec<(String, String)> = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = request.body().and_then(|b| b.as_bytes()).unwrap_or(&[]);

        let signable = SignableRequest::new(
            request.method().as_str(),
            request.url().as_str(),
            headers.iter().map(|(n, v)| (n.as_str(), v.as_str())),
            SignableBody::Bytes(body),
        )
        .map_err(|e| DataSourceError::Signing(error_chain(&e)))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| DataSourceError::Signing(error_chain(&e)))?
            .into_parts();

        let mut signed = Vec::new();
        for (name, value) in instructions.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DataSourceError::Signing(e.to_string()))?;
            let mut value =
                HeaderValue::from_str(value).map_err(|e| DataSourceError::Signing(e.to_string()))?;
            if name == reqwest::header::AUTHORIZATION || name.as_str() == "x-amz-security-token" {
                value.set_sensitive(true);
            }
            signed.push((name, value));
        }
        for (name, value) in signed {
            request.headers_mut().insert(name, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::credential::SecretString;
    use super::*;

    fn static_source() -> AwsSigningSource {
        AwsSigningSource::Static {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: SecretString::new("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
            session_token: None,
        }
    }

    #[tokio::test]
    async fn test_sign_adds_authorization_headers() {
        let signer = SigV4Signer::new("us-east-1", SigV4Service::Es, &static_source()).unwrap();
        let mut request = reqwest::Client::new()
            .get("https://search-domain.us-east-1.es.amazonaws.com/_cluster/health")
            .build()
            .unwrap();

        signer.sign(&mut request).await.unwrap();

        let auth = request.headers()["authorization"].to_str().unwrap().to_string();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("/us-east-1/es/aws4_request"));
        assert!(request.headers().contains_key("x-amz-date"));
        assert!(request.headers()["authorization"].is_sensitive());
    }

    #[tokio::test]
    async fn test_serverless_signs_payload_hash() {
        let signer = SigV4Signer::new("eu-west-1", SigV4Service::Aoss, &static_source()).unwrap();
        let mut request = reqwest::Client::new()
            .post("https://abc.eu-west-1.aoss.amazonaws.com/_search")
            .body(r#"{"query":{"match_all":{}}}"#)
            .build()
            .unwrap();

        signer.sign(&mut request).await.unwrap();

        assert!(request.headers().contains_key("x-amz-content-sha256"));
        let auth = request.headers()["authorization"].to_str().unwrap();
        assert!(auth.contains("/eu-west-1/aoss/aws4_request"));
    }

    #[test]
    fn test_unsupported_service_or_source_rejected() {
        assert!(matches!(
            SigV4Signer::new("us-east-1", SigV4Service::Unsupported, &static_source()),
            Err(DataSourceError::UnsupportedAuthType(_))
        ));
        assert!(matches!(
            SigV4Signer::new("us-east-1", SigV4Service::Es, &AwsSigningSource::Unsupported),
            Err(DataSourceError::UnsupportedAuthType(_))
        ));
    }
}
