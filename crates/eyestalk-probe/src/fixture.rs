//! Recorded stanza fixtures.
//!
//! A fixture is a fragment of protocol XML: one or more top-level stanzas
//! captured from a real client. Probes replay them verbatim apart from the
//! recipient address. Stores are read-only and are consulted on every send.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use eyestalk_core::stanza::StanzaError;

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("fixture {name:?} not found at {path}")]
    NotFound { name: String, path: PathBuf },
    #[error("failed to read fixture {name:?}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("fixture {name:?} is malformed: {source}")]
    Malformed {
        name: String,
        #[source]
        source: StanzaError,
    },
}

/// Source of recorded fixtures, keyed by name.
pub trait FixtureStore: Send + Sync {
    fn load(&self, name: &str) -> Result<String, FixtureError>;
}

/// Fixtures stored as `<root>/<name>.xml`.
#[derive(Debug, Clone)]
pub struct DirFixtureStore {
    root: PathBuf,
}

impl DirFixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.xml"))
    }
}

impl FixtureStore for DirFixtureStore {
    fn load(&self, name: &str) -> Result<String, FixtureError> {
        let path = self.path_for(name);
        std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                FixtureError::NotFound {
                    name: name.to_string(),
                    path,
                }
            } else {
                FixtureError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }
}

/// In-memory fixtures.
#[derive(Debug, Clone, Default)]
pub struct MemoryFixtureStore {
    fixtures: HashMap<String, String>,
}

impl MemoryFixtureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, xml: &str) -> Self {
        self.fixtures.insert(name.to_string(), xml.to_string());
        self
    }
}

impl FixtureStore for MemoryFixtureStore {
    fn load(&self, name: &str) -> Result<String, FixtureError> {
        self.fixtures
            .get(name)
            .cloned()
            .ok_or_else(|| FixtureError::NotFound {
                name: name.to_string(),
                path: PathBuf::from(format!("<memory>/{name}.xml")),
            })
    }
}
