use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How scene coordinates are tied to the ground plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// Four hand-placed corners of a rectangle of known size; origin at corner 0.
    #[default]
    CornerRect,
    /// Robust homography from user-placed reference points with typed-in world coordinates.
    ReferenceHomography,
    /// Robust homography from detected fiducial markers with known world anchors.
    MarkerHomography,
    /// No planar transform; per-point ray intersection from a calibrated camera pose.
    Markerless,
}

impl CalibrationMode {
    pub const ALL: [CalibrationMode; 4] = [
        CalibrationMode::CornerRect,
        CalibrationMode::ReferenceHomography,
        CalibrationMode::MarkerHomography,
        CalibrationMode::Markerless,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationMode::CornerRect => "corner_rect",
            CalibrationMode::ReferenceHomography => "reference_homography",
            CalibrationMode::MarkerHomography => "marker_homography",
            CalibrationMode::Markerless => "markerless",
        }
    }

    /// Whether projection goes through the grid's planar homography.
    pub fn uses_homography(self) -> bool {
        !matches!(self, CalibrationMode::Markerless)
    }
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown calibration mode {0:?} (expected corner_rect, reference_homography, marker_homography or markerless)")]
pub struct ParseModeError(pub String);

impl FromStr for CalibrationMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == norm)
            .ok_or_else(|| ParseModeError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!(
            "corner-rect".parse::<CalibrationMode>(),
            Ok(CalibrationMode::CornerRect)
        );
        assert_eq!(
            " Markerless ".parse::<CalibrationMode>(),
            Ok(CalibrationMode::Markerless)
        );
        assert!("grid".parse::<CalibrationMode>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&CalibrationMode::MarkerHomography).unwrap();
        assert_eq!(json, "\"marker_homography\"");
        let back: CalibrationMode = serde_json::from_str("\"reference_homography\"").unwrap();
        assert_eq!(back, CalibrationMode::ReferenceHomography);
    }
}
