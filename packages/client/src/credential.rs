//! Authentication credential discovery.
//!
//! A credential can live in several places: the cookie jar, persistent local
//! storage (under a handful of historical key names) or session-scoped
//! storage. [`TokenResolver`] probes a prioritized list of
//! [`CredentialSource`]s and returns the first usable value.

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::error::StoreError;

/// Storage APIs write these strings when asked to store a missing value.
const ABSENT_MARKERS: [&str; 2] = ["undefined", "null"];

/// Key the credential is stored under in every store.
pub const TOKEN_KEY: &str = "token";

/// Alternate keys probed in local storage after [`TOKEN_KEY`].
pub const ALTERNATE_TOKEN_KEYS: [&str; 4] = ["authToken", "accessToken", "jwt", "auth_token"];

/// Opaque authentication token
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Accept a raw stored value if it is usable as a credential.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.is_empty() || ABSENT_MARKERS.contains(&value) {
            return None;
        }
        Some(Self(value.to_string()))
    }

    /// The raw token, for placing into request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Read-only key/value storage backend
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

/// Cookies parsed from a `name=value; name2=value2` header string
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    pub fn parse(header: &str) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                // Split at the first '=' only: base64 padding stays in the value.
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();
        Self { cookies }
    }
}

impl KeyValueStore for CookieJar {
    fn get(&self, key: &str) -> Option<String> {
        self.cookies.get(key).cloned()
    }
}

/// Persistent storage backed by a JSON object file
#[derive(Debug, Clone, Default)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl JsonFileStore {
    /// Load the store; a missing file is an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| StoreError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Store '{}' does not exist, treating as empty", path.display());
                HashMap::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

/// Session-scoped storage read from the process environment.
///
/// Key `authToken` with prefix `KIZUNA_` reads `KIZUNA_AUTHTOKEN`.
#[derive(Debug, Clone)]
pub struct EnvStore {
    prefix: String,
}

impl EnvStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase())
    }
}

impl KeyValueStore for EnvStore {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.variable_name(key)).ok()
    }
}

/// One place a credential may be found
pub trait CredentialSource: Send + Sync {
    /// Label used in diagnostics (never the value itself)
    fn label(&self) -> String;

    /// Raw stored value, if any
    fn probe(&self) -> Option<String>;
}

/// A single key in a [`KeyValueStore`]
pub struct StoreKey {
    store_name: &'static str,
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl StoreKey {
    pub fn new(
        store_name: &'static str,
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store_name,
            store,
            key: key.into(),
        }
    }
}

impl CredentialSource for StoreKey {
    fn label(&self) -> String {
        format!("{}:{}", self.store_name, self.key)
    }

    fn probe(&self) -> Option<String> {
        self.store.get(&self.key)
    }
}

/// Any query function can act as a credential source.
impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn label(&self) -> String {
        "custom".to_string()
    }

    fn probe(&self) -> Option<String> {
        self()
    }
}

/// Finds the credential by probing sources in priority order; first usable value wins.
#[derive(Default)]
pub struct TokenResolver {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl TokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard probe order: cookie `token`, local `token` and its alternate
    /// keys, session `token`.
    pub fn standard(
        cookies: Arc<dyn KeyValueStore>,
        local: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
    ) -> Self {
        let mut resolver = Self::new().with_source(StoreKey::new("cookie", cookies, TOKEN_KEY));
        for key in std::iter::once(TOKEN_KEY).chain(ALTERNATE_TOKEN_KEYS) {
            resolver = resolver.with_source(StoreKey::new("local", Arc::clone(&local), key));
        }
        resolver.with_source(StoreKey::new("session", session, TOKEN_KEY))
    }

    /// Append a source with the lowest priority so far.
    pub fn with_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Resolve the credential. Pure query, cheap to repeat.
    pub fn resolve(&self) -> Option<Credential> {
        for source in &self.sources {
            if let Some(credential) = source.probe().as_deref().and_then(Credential::parse) {
                tracing::debug!("Credential found in {}", source.label());
                return Some(credential);
            }
        }
        tracing::debug!("No credential found in {} source(s)", self.sources.len());
        None
    }

    /// Labels of all sources in probe order
    pub fn source_labels(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.label()).collect()
    }
}
