//! Subfile manifests.
//!
//! A manifest lists the subfile names one participant produced in one
//! write. Non-leaders always produce an empty one; a leader produces at
//! most one name per write, so the inline capacity avoids allocating.

use smallvec::SmallVec;

use crate::error::FusionError;

/// Subfile names produced by one write on one participant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubfileManifest {
    names: SmallVec<[String; 1]>,
}

impl SubfileManifest {
    /// Empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a produced subfile.
    pub fn push(&mut self, name: impl Into<String>) {
        self.names.push(name.into());
    }

    /// Subfile names in production order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of subfiles.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no subfiles were produced.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Union of gathered manifests, in gather order.
    pub fn merge(parts: impl IntoIterator<Item = SubfileManifest>) -> Self {
        let mut out = Self::new();
        for part in parts {
            out.names.extend(part.names);
        }
        out
    }

    /// Newline-separated encoding for collective transport.
    pub fn encode(&self) -> Vec<u8> {
        self.names.join("\n").into_bytes()
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self, FusionError> {
        let text = std::str::from_utf8(bytes).map_err(|e| FusionError::Manifest {
            detail: format!("invalid UTF-8: {e}"),
        })?;
        Ok(Self {
            names: text
                .split('\n')
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

impl FromIterator<String> for SubfileManifest {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
        }
    }
}
