//! Composite keys for the ordered key-value store

use serde::{Deserialize, Serialize};

/// Ordered tuple of string segments.
///
/// Keys compare segment by segment, so a key sorts immediately before every
/// key it is a prefix of. Prefix matching is always on whole segments:
/// `["books"]` is a prefix of `["books", "42"]` but not of
/// `["books_by_isbn", "978..."]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<String>);

impl Key {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments; index namespaces are told apart from primary
    /// records by this.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<Vec<String>> for Key {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl From<Key> for Vec<String> {
    fn from(key: Key) -> Self {
        key.0
    }
}

/// Builds a [`Key`] from a list of segments: `key!["books", id]`.
#[macro_export]
macro_rules! key {
    ($($segment:expr),+ $(,)?) => {
        $crate::store::Key::new([$(::std::string::ToString::to_string(&$segment)),+])
    };
}
