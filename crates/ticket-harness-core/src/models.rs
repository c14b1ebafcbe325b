//! Core data models shared by the retrieval pipeline.
//!
//! A [`Fragment`] is the unit of retrievable text: one typed section
//! (summary, resolution, remediation steps, ...) of one ingested ticket or
//! document. Fragments are identified by their [`FragmentKey`], the
//! `(document_key, kind)` pair, which is unique in the store and is the
//! identity used by every ranking stage.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::embedding::{blob_to_vec, VectorError};

/// Priority assigned to kinds outside the fixed vocabulary.
pub const UNKNOWN_KIND_PRIORITY: u8 = 99;

/// What a fragment represents within its parent ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FragmentKind {
    /// Remediation steps (immediate fix remarks).
    Steps,
    /// Why a permanent fix is or is not required, plus target dates.
    DependencyReason,
    Resolution,
    RootCause,
    Description,
    Summary,
    /// Any label not in the vocabulary above, kept verbatim.
    Other(String),
}

impl FragmentKind {
    /// All kinds of the fixed vocabulary, in precedence order.
    pub const KNOWN: [FragmentKind; 6] = [
        FragmentKind::Steps,
        FragmentKind::DependencyReason,
        FragmentKind::Resolution,
        FragmentKind::RootCause,
        FragmentKind::Description,
        FragmentKind::Summary,
    ];

    /// Storage and display label.
    pub fn as_str(&self) -> &str {
        match self {
            FragmentKind::Steps => "steps",
            FragmentKind::DependencyReason => "dependency_reason",
            FragmentKind::Resolution => "resolution",
            FragmentKind::RootCause => "root_cause",
            FragmentKind::Description => "description",
            FragmentKind::Summary => "summary",
            FragmentKind::Other(label) => label,
        }
    }

    /// Context precedence: lower numbers are placed first.
    ///
    /// | Kind | Priority |
    /// |------|----------|
    /// | `steps` | 1 |
    /// | `dependency_reason` | 2 |
    /// | `resolution` | 3 |
    /// | `root_cause` | 4 |
    /// | `description` | 5 |
    /// | `summary` | 6 |
    /// | anything else | 99 |
    pub fn priority(&self) -> u8 {
        match self {
            FragmentKind::Steps => 1,
            FragmentKind::DependencyReason => 2,
            FragmentKind::Resolution => 3,
            FragmentKind::RootCause => 4,
            FragmentKind::Description => 5,
            FragmentKind::Summary => 6,
            FragmentKind::Other(_) => UNKNOWN_KIND_PRIORITY,
        }
    }
}

impl FromStr for FragmentKind {
    type Err = std::convert::Infallible;

    /// Parses a kind label. Matching ignores case and treats `-`, `_` and
    /// spaces alike; unrecognised labels become [`FragmentKind::Other`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        Ok(match normalized.as_str() {
            "steps" | "remediation_steps" => FragmentKind::Steps,
            "dependency_reason" => FragmentKind::DependencyReason,
            "resolution" => FragmentKind::Resolution,
            "root_cause" => FragmentKind::RootCause,
            "description" => FragmentKind::Description,
            "summary" => FragmentKind::Summary,
            _ => FragmentKind::Other(s.trim().to_string()),
        })
    }
}

impl From<&str> for FragmentKind {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FragmentKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Composite identity of a fragment across all ranking stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FragmentKey {
    pub document_key: String,
    pub kind: FragmentKind,
}

impl FragmentKey {
    pub fn new(document_key: impl Into<String>, kind: FragmentKind) -> Self {
        Self {
            document_key: document_key.into(),
            kind,
        }
    }

    /// Display identifier, e.g. `"INC-42-resolution"`.
    pub fn fragment_id(&self) -> String {
        format!("{}-{}", self.document_key, self.kind)
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.document_key, self.kind)
    }
}

/// An embedding as it was persisted.
///
/// Stores hold vectors either as a native numeric sequence, as JSON array
/// text, or as a little-endian `f32` BLOB. Decoding happens on read so a
/// single corrupt row only removes that fragment from dense scoring.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredVector {
    Values(Vec<f32>),
    Serialized(String),
    Blob(Vec<u8>),
}

impl StoredVector {
    /// Decode into a dense vector, validating shape and contents.
    pub fn decode(&self) -> Result<Vec<f32>, VectorError> {
        let values = match self {
            StoredVector::Values(v) => v.clone(),
            StoredVector::Serialized(text) => serde_json::from_str::<Vec<f32>>(text.trim())?,
            StoredVector::Blob(bytes) => {
                if bytes.len() % 4 != 0 {
                    return Err(VectorError::BlobLength(bytes.len()));
                }
                blob_to_vec(bytes)
            }
        };

        if values.is_empty() {
            return Err(VectorError::Empty);
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(VectorError::NonFinite);
        }
        Ok(values)
    }
}

impl From<Vec<f32>> for StoredVector {
    fn from(values: Vec<f32>) -> Self {
        StoredVector::Values(values)
    }
}

/// A unit of retrievable text.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub document_key: String,
    pub kind: FragmentKind,
    pub text: String,
    pub vector: Option<StoredVector>,
}

impl Fragment {
    pub fn new(
        document_key: impl Into<String>,
        kind: impl Into<FragmentKind>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            document_key: document_key.into(),
            kind: kind.into(),
            text: text.into(),
            vector: None,
        }
    }

    pub fn with_vector(mut self, vector: impl Into<StoredVector>) -> Self {
        self.vector = Some(vector.into());
        self
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey::new(self.document_key.clone(), self.kind.clone())
    }

    pub fn fragment_id(&self) -> String {
        self.key().fragment_id()
    }

    /// Build a [`ScoredResult`] for this fragment with the given score.
    pub fn scored(&self, score: f64) -> ScoredResult {
        ScoredResult {
            fragment_id: self.fragment_id(),
            key: self.key(),
            text: self.text.clone(),
            score,
        }
    }
}

impl From<String> for FragmentKind {
    fn from(s: String) -> Self {
        FragmentKind::from(s.as_str())
    }
}

/// A fragment ranked by a single algorithm.
///
/// `score` is on the producing algorithm's scale (BM25 or cosine) and is
/// not comparable across algorithms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub fragment_id: String,
    #[serde(flatten)]
    pub key: FragmentKey,
    pub text: String,
    pub score: f64,
}

impl ScoredResult {
    pub fn document_key(&self) -> &str {
        &self.key.document_key
    }

    pub fn kind(&self) -> &FragmentKind {
        &self.key.kind
    }
}

/// Fragment identities in fused rank order, best first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusedRanking(pub Vec<FragmentKey>);

impl FusedRanking {
    pub fn keys(&self) -> &[FragmentKey] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
