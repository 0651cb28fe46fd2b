//! Credential binding - scoped secret material
//!
//! Credentials are referenced by an opaque id in the pipeline definition and
//! resolved through a [`CredentialProvider`] only when their scope is entered.
//! The resolved bindings live in a child [`EnvironmentContext`] owned by the
//! scope's inner block, so they are gone as soon as that block finishes, on
//! success, failure or cancellation alike.

pub mod store;

use crate::core::context::{EnvironmentContext, ScopeKind, ScopeWatch};
use crate::core::error::StepError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub use store::{SecretSource, StaticCredentialProvider};

/// A secret string, wiped from memory on drop and never printed
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the plain value
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(****)")
    }
}

/// Opaque identifier of a credential
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Variables a credential contributes to its scope
#[derive(Debug, Clone, Default)]
pub struct CredentialMaterial {
    bindings: BTreeMap<String, Secret>,
}

impl CredentialMaterial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: Secret) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn into_bindings(self) -> BTreeMap<String, Secret> {
        self.bindings
    }
}

/// Errors raised while resolving a credential
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential with id `{0}`")]
    NotFound(String),

    #[error("`{name}` is inaccessible: {message}")]
    Inaccessible { name: String, message: String },
}

/// Source of secret material - allows for different backends
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Resolve a credential into the variables it binds
    async fn resolve(&self, credential: &CredentialRef) -> Result<CredentialMaterial, CredentialError>;

    /// Runner environment variables that hold secret material
    ///
    /// These are withheld from every child process and from the inherited
    /// process scope; only a credential scope can bring their values back.
    fn sealed_env_vars(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

#[async_trait]
impl<P: CredentialProvider + ?Sized> CredentialProvider for Arc<P> {
    async fn resolve(&self, credential: &CredentialRef) -> Result<CredentialMaterial, CredentialError> {
        (**self).resolve(credential).await
    }

    fn sealed_env_vars(&self) -> BTreeSet<String> {
        (**self).sealed_env_vars()
    }
}

/// Runs blocks of work with a credential's bindings in scope
#[derive(Debug)]
pub struct CredentialBinder<P> {
    provider: P,
}

impl<P: CredentialProvider> CredentialBinder<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Resolve `credential`, run `inner` against a child context holding its
    /// bindings, then release them
    ///
    /// `inner` receives the child context by value. Nothing else ever holds
    /// it, so it is dropped when `inner`'s future completes or is dropped.
    /// Resolution failures are returned as [`StepError::CredentialResolution`]
    /// without running `inner`.
    pub async fn with_credential<F, Fut, T>(
        &self,
        credential: &CredentialRef,
        parent: &EnvironmentContext,
        inner: F,
    ) -> Result<T, StepError>
    where
        F: FnOnce(EnvironmentContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let material = self.provider.resolve(credential).await.map_err(|e| {
            warn!("Credential {} could not be resolved: {}", credential, e);
            StepError::CredentialResolution {
                credential: credential.to_string(),
                message: e.to_string(),
            }
        })?;

        if material.is_empty() {
            warn!("Credential {} resolved to no bindings", credential);
        }
        info!(
            "Entering credential scope {} ({} bindings)",
            credential,
            material.len()
        );

        let child = parent.extend_secret(
            ScopeKind::Credential(credential.id().to_string()),
            material.into_bindings(),
        );
        let _release = ScopeRelease {
            credential: credential.id().to_string(),
            watch: child.watch(),
        };

        Ok(inner(child).await)
    }
}

/// Logs the close of a credential scope, whichever way it ends
struct ScopeRelease {
    credential: String,
    watch: ScopeWatch,
}

impl Drop for ScopeRelease {
    fn drop(&mut self) {
        info!("Leaving credential scope {}", self.credential);
        if !self.watch.is_released() {
            debug!(
                "Credential scope {} still referenced while closing",
                self.credential
            );
        }
    }
}
