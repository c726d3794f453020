//! Classification of geocoded pickup places.
//!
//! A [`PlaceClassifier`] decides whether a [`PlaceDescription`] is one of
//! the facilities the pipeline keeps. The stock implementation,
//! [`AirportMatchSet`], compares the display name against a fixed list of
//! airport names by exact string equality. The list is data: the built-in
//! set is embedded from `airports.toml` and a file of the same shape can
//! replace it at runtime.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use taxi_etl_trip_models::PlaceDescription;
use thiserror::Error;

/// Built-in airport display names.
const BUILTIN_AIRPORTS_TOML: &str = include_str!("../airports.toml");

/// Capability that classifies a place as a relevant facility.
pub trait PlaceClassifier: Send + Sync {
    /// Returns `true` if trips starting at `place` should be kept.
    fn classify(&self, place: &PlaceDescription) -> bool;
}

/// Errors loading a match set.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The match-set file could not be read.
    #[error("Failed to read match set {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The match-set TOML is malformed.
    #[error("Invalid match set: {0}")]
    Parse(#[from] toml::de::Error),

    /// The match set names no places, so every trip would be dropped.
    #[error("Match set contains no display names")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct MatchSetFile {
    display_names: Vec<String>,
}

/// Exact-match set of airport display names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirportMatchSet {
    display_names: BTreeSet<String>,
}

impl AirportMatchSet {
    /// Returns the built-in set of recognized airports.
    ///
    /// # Panics
    ///
    /// Panics if the embedded `airports.toml` is malformed (guarded by the
    /// test suite since the file is compiled in).
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN_AIRPORTS_TOML)
            .unwrap_or_else(|e| panic!("Embedded airports.toml is invalid: {e}"))
    }

    /// Builds a set from explicit display names.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Empty`] if `names` is empty.
    pub fn new(names: impl IntoIterator<Item = String>) -> Result<Self, ClassifierError> {
        let display_names: BTreeSet<String> = names.into_iter().collect();
        if display_names.is_empty() {
            return Err(ClassifierError::Empty);
        }
        Ok(Self { display_names })
    }

    /// Parses a set from TOML text with a top-level `display_names` array.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError`] if the TOML is malformed or names nothing.
    pub fn from_toml_str(text: &str) -> Result<Self, ClassifierError> {
        let file: MatchSetFile = toml::from_str(text)?;
        Self::new(file.display_names)
    }

    /// Reads a set from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError`] if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, ClassifierError> {
        let text = std::fs::read_to_string(path).map_err(|source| ClassifierError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let set = Self::from_toml_str(&text)?;
        log::info!(
            "Loaded {} airport display names from {}",
            set.len(),
            path.display()
        );
        Ok(set)
    }

    /// Number of display names in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.display_names.len()
    }

    /// Always `false` for a constructed set; provided for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_names.is_empty()
    }

    /// Iterates the display names in sorted order.
    pub fn display_names(&self) -> impl Iterator<Item = &str> {
        self.display_names.iter().map(String::as_str)
    }
}

impl PlaceClassifier for AirportMatchSet {
    fn classify(&self, place: &PlaceDescription) -> bool {
        self.display_names.contains(&place.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OHARE: &str = "O'Hare International Airport, 10000, Perimeter Road, O'Hare, Chicago, Jefferson Township, Cook County, Illinois, 60666, United States";

    fn place(name: &str) -> PlaceDescription {
        PlaceDescription {
            display_name: name.to_string(),
            ..PlaceDescription::default()
        }
    }

    #[test]
    fn builtin_set_has_three_airports() {
        let set = AirportMatchSet::builtin();
        assert_eq!(set.len(), 3);
        assert!(set.display_names().any(|n| n.starts_with("Lot A, O'Hare")));
        assert!(set.display_names().any(|n| n.starts_with("Chicago Midway")));
    }

    #[test]
    fn exact_display_name_matches() {
        assert!(AirportMatchSet::builtin().classify(&place(OHARE)));
    }

    #[test]
    fn near_misses_do_not_match() {
        let set = AirportMatchSet::builtin();
        assert!(!set.classify(&place(&OHARE.to_lowercase())));
        assert!(!set.classify(&place(&format!("{OHARE} "))));
        assert!(!set.classify(&place(&OHARE.replace(", 10000", " 10000"))));
        assert!(!set.classify(&place("")));
        assert!(!set.classify(&place("Union Station, Chicago, Illinois, United States")));
    }

    #[test]
    fn custom_set_replaces_builtin() {
        let set = AirportMatchSet::from_toml_str(r#"display_names = ["Gary/Chicago Airport"]"#)
            .unwrap();
        assert!(set.classify(&place("Gary/Chicago Airport")));
        assert!(!set.classify(&place(OHARE)));
    }

    #[test]
    fn empty_set_is_rejected() {
        assert!(matches!(
            AirportMatchSet::from_toml_str("display_names = []"),
            Err(ClassifierError::Empty)
        ));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        assert!(matches!(
            AirportMatchSet::from_toml_str("display_names = "),
            Err(ClassifierError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = std::env::temp_dir().join("taxi_etl_no_such_airports.toml");
        assert!(matches!(
            AirportMatchSet::from_path(&path),
            Err(ClassifierError::Io { .. })
        ));
    }
}
