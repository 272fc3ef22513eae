//! HTTP transport for provider calls.

use reqwest::{Certificate, Client, redirect};
use rootcause::prelude::{Report, ResultExt};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::error::ProviderError;

/// Default bound on a single provider call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport settings injected into every provider client.
///
/// Every provider call is bounded by `timeout`. Extra CA bundles are trusted
/// in addition to the system roots.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    pub timeout: Duration,
    pub ca_files: Vec<PathBuf>,
    pub insecure_skip_verify: bool,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            ca_files: Vec::new(),
            insecure_skip_verify: false,
        }
    }
}

impl HttpTransport {
    /// Builds the HTTP client a provider uses for all of its calls.
    ///
    /// Redirects are never followed: token and profile endpoints answer
    /// directly, and following a redirect would forward bearer tokens.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a CA file cannot be read or parsed.
    pub fn build_client(&self) -> Result<Client, Report<ProviderError>> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .redirect(redirect::Policy::none());

        for path in &self.ca_files {
            let pem = std::fs::read(path).map_err(|e| {
                ProviderError::configuration(format!("failed to read CA file {}: {e}", path.display()))
            })?;
            let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
                ProviderError::configuration(format!("invalid CA file {}: {e}", path.display()))
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if self.insecure_skip_verify {
            warn!("TLS verification of provider endpoints is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .context(ProviderError::configuration("failed to build HTTP client"))?;
        Ok(client)
    }
}
