//! Marker-id → world-anchor lookup.

use std::collections::HashMap;
use std::path::Path;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Keyed lookup of a marker's world anchor (metres).
///
/// The anchor is the world position of the marker quad's reference corner;
/// see [`crate::build_correspondences`] for how the other three corners are
/// derived from it.
pub trait MarkerLookup {
    fn anchor(&self, id: u32) -> Option<Point2<f64>>;
}

impl MarkerLookup for HashMap<u32, Point2<f64>> {
    fn anchor(&self, id: u32) -> Option<Point2<f64>> {
        self.get(&id).copied()
    }
}

/// Errors returned while reading a marker index.
#[derive(thiserror::Error, Debug)]
pub enum MarkerIndexError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("record {record}: cannot parse {field} from {token:?}")]
    InvalidField {
        record: usize,
        field: &'static str,
        token: String,
    },
    #[error("record {record} is incomplete ({tokens} of 6 tokens)")]
    Truncated { record: usize, tokens: usize },
    #[error("marker id {0} listed more than once")]
    DuplicateId(u32),
}

/// In-memory marker table.
///
/// The text form is a whitespace-separated sequence of six-token records,
/// `label id label x label y`, e.g.
///
/// ```text
/// id: 0 x: 0.00 y: 0.00
/// id: 1 x: 1.25 y: 0.00
/// ```
///
/// Label tokens are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerIndex {
    anchors: HashMap<u32, Point2<f64>>,
}

impl MarkerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u32, anchor: Point2<f64>) -> Option<Point2<f64>> {
        self.anchors.insert(id, anchor)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn parse(text: &str) -> Result<Self, MarkerIndexError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut index = Self::new();

        for (record, chunk) in tokens.chunks(6).enumerate() {
            if chunk.len() < 6 {
                return Err(MarkerIndexError::Truncated {
                    record,
                    tokens: chunk.len(),
                });
            }
            let id = parse_field::<u32>(record, "id", chunk[1])?;
            let x = parse_field::<f64>(record, "x", chunk[3])?;
            let y = parse_field::<f64>(record, "y", chunk[5])?;
            if index.insert(id, Point2::new(x, y)).is_some() {
                return Err(MarkerIndexError::DuplicateId(id));
            }
        }

        log::debug!("marker index: {} anchors", index.len());
        Ok(index)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MarkerIndexError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }
}

impl MarkerLookup for MarkerIndex {
    fn anchor(&self, id: u32) -> Option<Point2<f64>> {
        self.anchors.get(&id).copied()
    }
}

fn parse_field<T: std::str::FromStr>(
    record: usize,
    field: &'static str,
    token: &str,
) -> Result<T, MarkerIndexError> {
    token.parse().map_err(|_| MarkerIndexError::InvalidField {
        record,
        field,
        token: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_labelled_records() {
        let idx = MarkerIndex::parse("id: 0 x: 0.0 y: 0.0\nid: 7 x: 1.25 y: -0.5\n").unwrap();
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.anchor(7), Some(Point2::new(1.25, -0.5)));
        assert_eq!(idx.anchor(3), None);
    }

    #[test]
    fn incomplete_record_is_reported() {
        let err = MarkerIndex::parse("id: 0 x: 0.0 y: 0.0 id: 1 x:").unwrap_err();
        assert!(matches!(
            err,
            MarkerIndexError::Truncated {
                record: 1,
                tokens: 3
            }
        ));
    }

    #[test]
    fn bad_number_names_the_field() {
        let err = MarkerIndex::parse("id: 0 x: zero y: 0.0").unwrap_err();
        assert!(matches!(err, MarkerIndexError::InvalidField { field: "x", .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = MarkerIndex::parse("id: 2 x: 0 y: 0 id: 2 x: 1 y: 1").unwrap_err();
        assert!(matches!(err, MarkerIndexError::DuplicateId(2)));
    }

    #[test]
    fn reads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "marker 4 x 2.0 y 3.0").unwrap();
        let idx = MarkerIndex::from_path(file.path()).unwrap();
        assert_eq!(idx.anchor(4), Some(Point2::new(2.0, 3.0)));
    }
}
