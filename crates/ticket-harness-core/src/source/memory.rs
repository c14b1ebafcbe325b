//! In-memory [`FragmentSource`] for tests and embedding callers.
//!
//! Fragments live in a `Vec` behind `std::sync::RwLock`, kept in insertion
//! order so snapshots are deterministic.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Fragment;

use super::FragmentSource;

#[derive(Debug, Default)]
pub struct InMemorySource {
    fragments: RwLock<Vec<Fragment>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fragments(fragments: impl IntoIterator<Item = Fragment>) -> Self {
        let source = Self::new();
        if let Ok(mut guard) = source.fragments.write() {
            for fragment in fragments {
                upsert_into(&mut guard, fragment);
            }
        }
        source
    }

    /// Insert a fragment, replacing any fragment with the same
    /// `(document_key, kind)` in place.
    pub fn upsert(&self, fragment: Fragment) -> Result<()> {
        let mut guard = self
            .fragments
            .write()
            .map_err(|_| anyhow!("in-memory fragment lock poisoned"))?;
        upsert_into(&mut guard, fragment);
        Ok(())
    }

    /// Drop every fragment of a document. Returns how many were removed.
    pub fn remove_document(&self, document_key: &str) -> Result<usize> {
        let mut guard = self
            .fragments
            .write()
            .map_err(|_| anyhow!("in-memory fragment lock poisoned"))?;
        let before = guard.len();
        guard.retain(|f| f.document_key != document_key);
        Ok(before - guard.len())
    }

    pub fn len(&self) -> usize {
        self.fragments.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn upsert_into(fragments: &mut Vec<Fragment>, fragment: Fragment) {
    match fragments
        .iter_mut()
        .find(|f| f.document_key == fragment.document_key && f.kind == fragment.kind)
    {
        Some(existing) => *existing = fragment,
        None => fragments.push(fragment),
    }
}

#[async_trait]
impl FragmentSource for InMemorySource {
    async fn fetch_fragments(&self) -> Result<Vec<Fragment>> {
        let guard = self
            .fragments
            .read()
            .map_err(|_| anyhow!("in-memory fragment lock poisoned"))?;
        Ok(guard
            .iter()
            .filter(|f| !f.text.trim().is_empty())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FragmentKind;

    #[tokio::test]
    async fn upsert_replaces_same_key() {
        let source = InMemorySource::new();
        source
            .upsert(Fragment::new("T1", FragmentKind::Summary, "old"))
            .unwrap();
        source
            .upsert(Fragment::new("T1", FragmentKind::Resolution, "fix"))
            .unwrap();
        source
            .upsert(Fragment::new("T1", FragmentKind::Summary, "new"))
            .unwrap();

        let snapshot = source.fetch_fragments().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].text, "new");
        assert_eq!(snapshot[1].kind, FragmentKind::Resolution);
    }

    #[tokio::test]
    async fn blank_fragments_are_not_served() {
        let source = InMemorySource::from_fragments(vec![
            Fragment::new("T1", FragmentKind::Summary, "login fails"),
            Fragment::new("T2", FragmentKind::Summary, "   "),
        ]);
        assert_eq!(source.len(), 2);
        assert_eq!(source.fetch_fragments().await.unwrap().len(), 1);
    }

    #[test]
    fn remove_document_drops_all_kinds() {
        let source = InMemorySource::from_fragments(vec![
            Fragment::new("T1", FragmentKind::Summary, "a"),
            Fragment::new("T1", FragmentKind::Steps, "b"),
            Fragment::new("T2", FragmentKind::Summary, "c"),
        ]);
        assert_eq!(source.remove_document("T1").unwrap(), 2);
        assert_eq!(source.len(), 1);
        assert_eq!(source.remove_document("missing").unwrap(), 0);
    }
}
