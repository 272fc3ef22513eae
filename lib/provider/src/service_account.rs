//! In-cluster service account credentials.
//!
//! When the proxy runs as a pod it can act as an OAuth client through its
//! service account: the client id is the account's full name and the client
//! secret is the mounted token.

use rootcause::prelude::{Report, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ProviderError;

/// Where the cluster mounts the pod's service account.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const NAMESPACE_FILE: &str = "namespace";
const TOKEN_FILE: &str = "token";
const CA_FILE: &str = "ca.crt";

/// Credentials of a mounted service account.
#[derive(Clone)]
pub struct ServiceAccount {
    name: String,
    namespace: String,
    token: String,
    ca_file: Option<PathBuf>,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("ca_file", &self.ca_file)
            .finish_non_exhaustive()
    }
}

impl ServiceAccount {
    /// Loads the account `name` from a mounted secret directory.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is empty or the namespace
    /// or token file is missing or empty.
    pub fn load(dir: &Path, name: &str) -> Result<Self, Report<ProviderError>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProviderError::configuration("service account name is required").into());
        }
        let namespace = read_trimmed(&dir.join(NAMESPACE_FILE))?;
        let token = read_trimmed(&dir.join(TOKEN_FILE))?;
        let ca_file = Some(dir.join(CA_FILE)).filter(|path| path.is_file());

        Ok(Self {
            name: name.to_string(),
            namespace,
            token,
            ca_file,
        })
    }

    /// The OAuth client id, `system:serviceaccount:<namespace>:<name>`.
    #[must_use]
    pub fn client_id(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.name)
    }

    /// The OAuth client secret, which is the account token.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.token
    }

    /// The cluster CA bundle mounted next to the token, if present.
    #[must_use]
    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_file.as_deref()
    }
}

fn read_trimmed(path: &Path) -> Result<String, Report<ProviderError>> {
    let value = fs::read_to_string(path).context(ProviderError::configuration(format!(
        "failed to read service account file {}",
        path.display()
    )))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ProviderError::configuration(format!(
            "service account file {} is empty",
            path.display()
        ))
        .into());
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).expect("write");
        }
        dir
    }

    #[test]
    fn loads_client_credentials() {
        let dir = mount(&[("namespace", "apps\n"), ("token", "sa-token\n")]);
        let account = ServiceAccount::load(dir.path(), "proxy").expect("account");

        assert_eq!(account.client_id(), "system:serviceaccount:apps:proxy");
        assert_eq!(account.client_secret(), "sa-token");
        assert!(account.ca_file().is_none());
        assert!(!format!("{account:?}").contains("sa-token"));
    }

    #[test]
    fn picks_up_mounted_ca() {
        let dir = mount(&[("namespace", "apps"), ("token", "t"), ("ca.crt", "pem")]);
        let account = ServiceAccount::load(dir.path(), "proxy").expect("account");
        assert_eq!(account.ca_file(), Some(dir.path().join("ca.crt").as_path()));
    }

    #[test]
    fn missing_or_empty_files_are_rejected() {
        let dir = mount(&[("namespace", "apps")]);
        let err = ServiceAccount::load(dir.path(), "proxy").expect_err("no token");
        assert!(matches!(err.current_context(), ProviderError::Configuration { .. }));

        let dir = mount(&[("namespace", " \n"), ("token", "t")]);
        assert!(ServiceAccount::load(dir.path(), "proxy").is_err());

        let dir = mount(&[("namespace", "apps"), ("token", "t")]);
        assert!(ServiceAccount::load(dir.path(), " ").is_err());
    }
}
