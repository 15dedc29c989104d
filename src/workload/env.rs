//! Container environment composition.

use crate::runtime::KeyValue;

use super::WorkloadConfig;

/// An ordered set of environment variables with unique keys.
///
/// Setting an existing key replaces its value in place, so the first
/// occurrence keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars {
    vars: Vec<KeyValue>,
}

impl EnvVars {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|kv| kv.key == key) {
            Some(existing) => existing.value = value,
            None => self.vars.push(KeyValue { key, value }),
        }
    }

    /// Sets every pair from `vars` in iteration order.
    pub fn overlay<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.set(key, value);
        }
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if no variable is set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.vars.iter()
    }

    /// Consumes the set, yielding pairs in order.
    pub fn into_vec(self) -> Vec<KeyValue> {
        self.vars
    }
}

/// Builds the container environment for `config`.
///
/// Base entries are `TYPE` and `EULA`; `extra_env` is applied on top and
/// wins on collision.
pub fn compose_env(config: &WorkloadConfig) -> EnvVars {
    let mut env = EnvVars::new();
    env.set("TYPE", config.server_type.as_str());
    env.set("EULA", if config.accept_eula { "TRUE" } else { "FALSE" });
    env.overlay(&config.extra_env);
    env
}
