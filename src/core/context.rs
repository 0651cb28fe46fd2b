//! Environment context - scoped variables and interpolation
//!
//! A context is a chain of immutable scopes. Extending a context allocates a
//! new child scope that points at its parent; the parent is never mutated.
//! Dropping the last handle to a child scope drops everything bound in it,
//! which is how credential bindings disappear when their block closes.

use crate::core::error::StepError;
use crate::credentials::Secret;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, LazyLock, Weak};

// `$$`, `${NAME}` or `$NAME`
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\$|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap()
});

static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Placeholder written over secret values in captured output
pub const MASK: &str = "****";

/// Check whether a string is usable as a variable name
pub fn is_valid_name(name: &str) -> bool {
    NAME_REGEX.is_match(name)
}

/// Where a scope came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    /// Inherited process environment (opt-in)
    Process,
    /// Variables provided by the runner itself
    Builtin,
    /// Pipeline-level `environment`
    Global,
    /// A stage's own `environment`
    Stage(String),
    /// Bindings injected by a credential scope
    Credential(String),
    /// Outcome variables visible to a post hook
    Hook,
    /// Step-local `env`
    Step,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Process => write!(f, "process"),
            ScopeKind::Builtin => write!(f, "builtin"),
            ScopeKind::Global => write!(f, "global"),
            ScopeKind::Stage(name) => write!(f, "stage:{}", name),
            ScopeKind::Credential(id) => write!(f, "credential:{}", id),
            ScopeKind::Hook => write!(f, "hook"),
            ScopeKind::Step => write!(f, "step"),
        }
    }
}

#[derive(Debug)]
enum Binding {
    Plain(String),
    Secret(Secret),
}

impl Binding {
    fn value(&self) -> &str {
        match self {
            Binding::Plain(value) => value,
            Binding::Secret(secret) => secret.expose(),
        }
    }
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    bindings: BTreeMap<String, Binding>,
    parent: Option<Arc<Scope>>,
}

/// Variables visible to a stage or step
///
/// Cloning is cheap and shares the scope chain.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    scope: Arc<Scope>,
}

impl EnvironmentContext {
    /// Create a root context with a single scope
    pub fn root<I, K, V>(kind: ScopeKind, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            scope: Arc::new(Scope {
                kind,
                bindings: vars
                    .into_iter()
                    .map(|(k, v)| (k.into(), Binding::Plain(v.into())))
                    .collect(),
                parent: None,
            }),
        }
    }

    /// Create an empty global context
    pub fn new() -> Self {
        Self::root(ScopeKind::Global, BTreeMap::<String, String>::new())
    }

    /// Create a child context with plain bindings layered on top of this one
    pub fn extend<I, K, V>(&self, kind: ScopeKind, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.child(
            kind,
            vars.into_iter()
                .map(|(k, v)| (k.into(), Binding::Plain(v.into())))
                .collect(),
        )
    }

    /// Create a child context holding secret bindings
    pub fn extend_secret<I>(&self, kind: ScopeKind, secrets: I) -> Self
    where
        I: IntoIterator<Item = (String, Secret)>,
    {
        self.child(
            kind,
            secrets
                .into_iter()
                .map(|(k, v)| (k, Binding::Secret(v)))
                .collect(),
        )
    }

    fn child(&self, kind: ScopeKind, bindings: BTreeMap<String, Binding>) -> Self {
        Self {
            scope: Arc::new(Scope {
                kind,
                bindings,
                parent: Some(Arc::clone(&self.scope)),
            }),
        }
    }

    /// Kind of the innermost scope
    pub fn kind(&self) -> &ScopeKind {
        &self.scope.kind
    }

    /// Number of scopes in the chain
    pub fn depth(&self) -> usize {
        self.scopes().count()
    }

    fn scopes(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(&*self.scope), |scope| scope.parent.as_deref())
    }

    /// Look a variable up, innermost scope first
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.scopes()
            .find_map(|scope| scope.bindings.get(name))
            .map(Binding::value)
    }

    /// Look a variable up, failing if it is bound nowhere
    pub fn resolve(&self, name: &str) -> Result<&str, StepError> {
        self.lookup(name).ok_or_else(|| StepError::undefined(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Replace `$NAME` and `${NAME}` tokens with their values
    ///
    /// `$$` produces a literal `$`. A `$` that does not start a valid name is
    /// kept as is, so shell constructs such as `$(date)` or `$1` pass through.
    pub fn interpolate(&self, template: &str) -> Result<String, StepError> {
        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;

        for caps in VAR_REGEX.captures_iter(template) {
            let Some(token) = caps.get(0) else { continue };
            rendered.push_str(&template[last..token.start()]);
            match caps.get(1).or_else(|| caps.get(2)) {
                Some(name) => rendered.push_str(self.resolve(name.as_str())?),
                None => rendered.push('$'),
            }
            last = token.end();
        }

        rendered.push_str(&template[last..]);
        Ok(rendered)
    }

    /// All visible variables, inner scopes shadowing outer ones
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let chain: Vec<&Scope> = self.scopes().collect();
        let mut vars = BTreeMap::new();
        for scope in chain.into_iter().rev() {
            for (name, binding) in &scope.bindings {
                vars.insert(name.clone(), binding.value().to_string());
            }
        }
        vars
    }

    /// Replace every visible secret value in `text` with [`MASK`]
    pub fn mask(&self, text: &str) -> String {
        let mut secrets: Vec<&str> = self
            .scopes()
            .flat_map(|scope| scope.bindings.values())
            .filter_map(|binding| match binding {
                Binding::Secret(secret) if !secret.is_empty() => Some(secret.expose()),
                _ => None,
            })
            .collect();

        // Longest first so a secret containing another is masked whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

        secrets
            .into_iter()
            .fold(text.to_string(), |masked, secret| masked.replace(secret, MASK))
    }

    /// A handle that reports whether this context's innermost scope is still alive
    pub fn watch(&self) -> ScopeWatch {
        ScopeWatch {
            scope: Arc::downgrade(&self.scope),
        }
    }
}

impl Default for EnvironmentContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Weak observer of a scope, used to confirm that bindings were released
#[derive(Debug, Clone)]
pub struct ScopeWatch {
    scope: Weak<Scope>,
}

impl ScopeWatch {
    /// True once every handle to the scope has been dropped
    pub fn is_released(&self) -> bool {
        self.scope.strong_count() == 0
    }
}

/// Builds the root context for a pipeline run
#[derive(Debug, Clone, Default)]
pub struct EnvironmentResolver {
    inherit_process_env: bool,
    overrides: BTreeMap<String, String>,
    sealed: BTreeSet<String>,
}

impl EnvironmentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the runner's own process environment the outermost scope
    pub fn inherit_process_env(mut self, inherit: bool) -> Self {
        self.inherit_process_env = inherit;
        self
    }

    /// Leave these variables out of the inherited process scope
    pub fn seal(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.sealed.extend(names);
        self
    }

    /// Replace a global variable's value for this run
    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    /// Produce the root context: process (optional) → builtin → global
    pub fn resolve(
        &self,
        pipeline_name: &str,
        globals: &BTreeMap<String, String>,
    ) -> EnvironmentContext {
        let mut builtin = BTreeMap::new();
        builtin.insert("PIPELINE_NAME".to_string(), pipeline_name.to_string());
        if let Ok(cwd) = std::env::current_dir() {
            builtin.insert("WORKSPACE".to_string(), cwd.display().to_string());
        }

        let base = if self.inherit_process_env {
            let process = std::env::vars().filter(|(name, _)| !self.sealed.contains(name));
            EnvironmentContext::root(ScopeKind::Process, process)
                .extend(ScopeKind::Builtin, builtin)
        } else {
            EnvironmentContext::root(ScopeKind::Builtin, builtin)
        };

        let mut global = globals.clone();
        global.extend(self.overrides.clone());

        base.extend(ScopeKind::Global, global)
    }
}
