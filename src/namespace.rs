//! Key namespace
//!
//! Maps the logical key of an independent register onto the key actually
//! stored in etcd, so many registers can share one cluster.

/// Mapping from logical register keys to storage keys
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum KeyNamespace {
    /// Store the logical key as-is (its decimal form)
    #[default]
    Identity,
    /// Store under `{prefix}/{key}`
    Prefixed(String),
}

impl KeyNamespace {
    /// Namespace that places every register under `prefix`
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        KeyNamespace::Prefixed(prefix.trim_end_matches('/').to_string())
    }

    /// Storage key for a logical register key
    pub fn physical_key(&self, key: u64) -> String {
        match self {
            KeyNamespace::Identity => key.to_string(),
            KeyNamespace::Prefixed(prefix) => format!("{}/{}", prefix, key),
        }
    }
}
