//! FaceDataset - reference encodings per identity

use crate::models::FaceEncoding;
use std::collections::BTreeMap;

/// Where a dataset entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Loaded from the known-user roster
    Known,
    /// Unknown face first seen during this session
    Ephemeral,
}

#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub kind: EntryKind,
    pub encodings: Vec<FaceEncoding>,
    pub tracking_enabled: bool,
}

/// Listing order: numeric ids ascending, then other ids lexicographically
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum UserKey {
    Numeric(i64, String),
    Text(String),
}

impl UserKey {
    fn new(id: &str) -> Self {
        match id.parse::<i64>() {
            Ok(n) => UserKey::Numeric(n, id.to_string()),
            Err(_) => UserKey::Text(id.to_string()),
        }
    }

    fn id(&self) -> &str {
        match self {
            UserKey::Numeric(_, s) | UserKey::Text(s) => s,
        }
    }
}

/// Best dataset match for an encoding
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub id: String,
    pub kind: EntryKind,
    pub distance: f32,
    pub tracking_enabled: bool,
}

/// Mapping from identity id to reference encodings
#[derive(Debug, Clone, Default)]
pub struct FaceDataset {
    entries: BTreeMap<UserKey, DatasetEntry>,
}

impl FaceDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_known(&mut self, id: &str, tracking_enabled: bool, encodings: Vec<FaceEncoding>) {
        self.entries.insert(
            UserKey::new(id),
            DatasetEntry {
                kind: EntryKind::Known,
                encodings,
                tracking_enabled,
            },
        );
    }

    pub fn insert_ephemeral(&mut self, id: &str, encoding: FaceEncoding) {
        self.entries.insert(
            UserKey::new(id),
            DatasetEntry {
                kind: EntryKind::Ephemeral,
                encodings: vec![encoding],
                tracking_enabled: true,
            },
        );
    }

    /// Drop an ephemeral entry; known users are never removed
    pub fn forget_ephemeral(&mut self, id: &str) -> bool {
        let key = UserKey::new(id);
        match self.entries.get(&key) {
            Some(entry) if entry.kind == EntryKind::Ephemeral => {
                self.entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&DatasetEntry> {
        self.entries.get(&UserKey::new(id))
    }

    /// Flip the tracking flag; `None` if the id is not in the dataset
    pub fn set_tracking(&mut self, id: &str, enabled: bool) -> Option<bool> {
        let entry = self.entries.get_mut(&UserKey::new(id))?;
        let previous = entry.tracking_enabled;
        entry.tracking_enabled = enabled;
        Some(previous)
    }

    /// Closest identity whose best encoding is within `tolerance`.
    ///
    /// The result does not depend on id order. Two different identities at
    /// exactly the same best distance are ambiguous and yield `None`.
    pub fn best_match(&self, encoding: &FaceEncoding, tolerance: f32) -> Option<FaceMatch> {
        let mut best: Option<FaceMatch> = None;
        let mut tied = false;

        for (key, entry) in &self.entries {
            let Some(distance) = entry
                .encodings
                .iter()
                .map(|known| known.distance(encoding))
                .min_by(|a, b| a.total_cmp(b))
            else {
                continue;
            };

            if distance > tolerance {
                continue;
            }

            match &best {
                Some(current) if distance > current.distance => {}
                Some(current) if distance == current.distance => tied = true,
                _ => {
                    tied = false;
                    best = Some(FaceMatch {
                        id: key.id().to_string(),
                        kind: entry.kind,
                        distance,
                        tracking_enabled: entry.tracking_enabled,
                    });
                }
            }
        }

        if tied {
            return None;
        }
        best
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in listing order
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().map(|k| k.id().to_string()).collect()
    }

    pub fn tracking_enabled_count(&self) -> usize {
        self.entries.values().filter(|e| e.tracking_enabled).count()
    }
}
