//! Credential stores backed by memory or a YAML file

use crate::credentials::{
    CredentialError, CredentialMaterial, CredentialProvider, CredentialRef, Secret,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a single secret value comes from
///
/// Environment and file sources are read when the credential is resolved,
/// not when the store is loaded.
#[derive(Debug, Clone)]
pub enum SecretSource {
    Literal(Secret),
    FromEnv(String),
    FromFile(PathBuf),
}

impl SecretSource {
    async fn read(&self, name: &str) -> Result<Secret, CredentialError> {
        match self {
            SecretSource::Literal(secret) => Ok(secret.clone()),
            SecretSource::FromEnv(var) => std::env::var(var).map(Secret::new).map_err(|e| {
                CredentialError::Inaccessible {
                    name: name.to_string(),
                    message: format!("environment variable {}: {}", var, e),
                }
            }),
            SecretSource::FromFile(path) => tokio::fs::read_to_string(path)
                .await
                .map(|content| Secret::new(content.trim_end_matches(['\r', '\n'])))
                .map_err(|e| CredentialError::Inaccessible {
                    name: name.to_string(),
                    message: format!("{}: {}", path.display(), e),
                }),
        }
    }
}

/// Credential file as written on disk
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    credentials: HashMap<String, BTreeMap<String, SecretSourceConfig>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SecretSourceConfig {
    Literal(String),
    FromEnv { from_env: String },
    FromFile { from_file: PathBuf },
}

impl From<SecretSourceConfig> for SecretSource {
    fn from(config: SecretSourceConfig) -> Self {
        match config {
            SecretSourceConfig::Literal(value) => SecretSource::Literal(Secret::new(value)),
            SecretSourceConfig::FromEnv { from_env } => SecretSource::FromEnv(from_env),
            SecretSourceConfig::FromFile { from_file } => SecretSource::FromFile(from_file),
        }
    }
}

/// Credential provider holding a fixed table of credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    credentials: HashMap<String, BTreeMap<String, SecretSource>>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential made of literal values
    pub fn with_credential<I, K, V>(mut self, id: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entry = self.credentials.entry(id.into()).or_default();
        for (name, value) in values {
            entry.insert(name.into(), SecretSource::Literal(Secret::new(value)));
        }
        self
    }

    /// Add one binding with an explicit source
    pub fn with_source(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        source: SecretSource,
    ) -> Self {
        self.credentials
            .entry(id.into())
            .or_default()
            .insert(name.into(), source);
        self
    }

    /// Load a credentials YAML file
    ///
    /// Relative `from_file` paths are taken from the credentials file's own
    /// directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        let provider = Self::from_yaml(&content)?;
        Ok(match path.parent() {
            Some(base) => provider.relative_to(base),
            None => provider,
        })
    }

    fn relative_to(mut self, base: &Path) -> Self {
        for source in self.credentials.values_mut().flat_map(|s| s.values_mut()) {
            if let SecretSource::FromFile(file) = source {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        self
    }

    /// Parse credentials from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: CredentialsFile =
            serde_yaml::from_str(yaml).context("Invalid credentials file")?;

        let credentials = file
            .credentials
            .into_iter()
            .map(|(id, values)| {
                let values = values
                    .into_iter()
                    .map(|(name, source)| (name, SecretSource::from(source)))
                    .collect();
                (id, values)
            })
            .collect();

        Ok(Self { credentials })
    }

    /// Ids of all known credentials, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.credentials.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, credential: &CredentialRef) -> Result<CredentialMaterial, CredentialError> {
        let sources = self
            .credentials
            .get(credential.id())
            .ok_or_else(|| CredentialError::NotFound(credential.id().to_string()))?;

        let mut material = CredentialMaterial::new();
        for (name, source) in sources {
            material = material.bind(name.clone(), source.read(name).await?);
        }

        debug!("Resolved credential {} into {:?}", credential, material.names().collect::<Vec<_>>());
        Ok(material)
    }

    fn sealed_env_vars(&self) -> BTreeSet<String> {
        self.credentials
            .values()
            .flat_map(|sources| sources.values())
            .filter_map(|source| match source {
                SecretSource::FromEnv(var) => Some(var.clone()),
                _ => None,
            })
            .collect()
    }
}
