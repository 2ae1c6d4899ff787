//! Normalized filesystem paths.
//!
//! Textual form is `/data/a/b`: slash-separated components under the fixed
//! root name. `""`, `"/"` and `"/data"` all denote root, which is stored as the
//! empty component sequence. Equality and ordering are component-wise.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::NamingError;

/// Name of the tree root, the first component of every textual path.
pub const ROOT_NAME: &str = "data";

/// A normalized path below the tree root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    components: Vec<String>,
}

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and normalize a textual path.
    ///
    /// Repeated slashes are collapsed. `.` and `..` components, and paths
    /// not rooted at [`ROOT_NAME`], are rejected.
    pub fn parse(text: &str) -> Result<Self, NamingError> {
        let mut parts = text.split('/').filter(|c| !c.is_empty());

        match parts.next() {
            None => return Ok(Self::root()),
            Some(first) if first == ROOT_NAME => {}
            Some(_) => return Err(NamingError::InvalidPath(text.to_string())),
        }

        let mut components = Vec::new();
        for part in parts {
            if part == "." || part == ".." {
                return Err(NamingError::InvalidPath(text.to_string()));
            }
            components.push(part.to_string());
        }
        Ok(Self { components })
    }

    /// Returns true if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Components below root, outermost first.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Number of components below root.
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Final component, or `None` for root.
    pub fn last(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// Parent path, or `None` for root.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    /// Appends one component.
    pub fn join(&self, name: &str) -> Result<Path, NamingError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(NamingError::InvalidPath(format!("{}/{}", self, name)));
        }
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(Self { components })
    }

    /// Every strict ancestor, root first. Empty for root.
    pub fn ancestors(&self) -> Vec<Path> {
        (0..self.components.len())
            .map(|len| Self {
                components: self.components[..len].to_vec(),
            })
            .collect()
    }

    /// Returns true if `self` equals `other` or lies below it.
    pub fn is_subpath_of(&self, other: &Path) -> bool {
        self.components.starts_with(&other.components)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", ROOT_NAME)?;
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = NamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = NamingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}
