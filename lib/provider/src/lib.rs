//! Identity provider clients for portcullis.
//!
//! A [`Provider`] drives the OAuth2 authorization-code flow against one
//! identity provider and resolves tokens to identities. Two variants exist:
//! [`GenericProvider`] for plain OAuth2 servers and [`OpenShiftProvider`],
//! which also performs delegated authorization (group membership and
//! subject access reviews) against the cluster API.

mod client;
mod descriptor;
mod error;
mod generic;
mod openshift;
mod provider;
mod service_account;
mod transport;
mod types;

use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::info;

pub use descriptor::{DEFAULT_OPENSHIFT_API_URL, ProviderDescriptor, ProviderDescriptorBuilder};
pub use error::ProviderError;
pub use generic::GenericProvider;
pub use openshift::{CLUSTER_EMAIL_DOMAIN, OpenShiftProvider};
pub use provider::Provider;
pub use service_account::{SERVICE_ACCOUNT_DIR, ServiceAccount};
pub use transport::{DEFAULT_TIMEOUT, HttpTransport};
pub use types::{AccessReview, DelegateUrls, Identity, ProviderKind, Tokens};

/// Builds the provider a descriptor describes.
///
/// # Errors
///
/// Returns a configuration error if the HTTP transport cannot be built.
pub fn build_provider(
    descriptor: &ProviderDescriptor,
    transport: &HttpTransport,
) -> Result<Arc<dyn Provider>, Report<ProviderError>> {
    let http = transport.build_client()?;
    let provider: Arc<dyn Provider> = match descriptor.kind() {
        ProviderKind::Generic => Arc::new(GenericProvider::new(descriptor, http)?),
        ProviderKind::OpenShift => Arc::new(OpenShiftProvider::new(descriptor, http)?),
    };
    info!(
        provider = provider.name(),
        login_url = %descriptor.login_url(),
        "Configured identity provider"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_each_variant() {
        let openshift = ProviderDescriptor::builder(ProviderKind::OpenShift, "proxy", "secret")
            .build()
            .expect("descriptor");
        let provider = build_provider(&openshift, &HttpTransport::default()).expect("provider");
        assert_eq!(provider.name(), "OpenShift");
        assert!(provider.is_delegated());

        let generic = ProviderDescriptor::builder(ProviderKind::Generic, "client", "secret")
            .login_url("https://idp.example/authorize")
            .redeem_url("https://idp.example/token")
            .build()
            .expect("descriptor");
        let provider = build_provider(&generic, &HttpTransport::default()).expect("provider");
        assert_eq!(provider.name(), "OAuth2");
        assert!(!provider.is_delegated());
        assert!(!provider.delegates_path("/"));
    }
}
