//! Compile-time registry of study-area sources.
//!
//! Each entry is a `(name, toml_content)` pair embedded via `include_str!`.
//! Adding a new city requires creating a TOML file in `sources/` and adding
//! a corresponding entry here.

use crime_risk_ingest_models::StudySource;

use crate::IngestError;

/// Number of registered sources. Enforced by a test.
#[cfg(test)]
const EXPECTED_SOURCE_COUNT: usize = 1;

/// Embedded TOML source definitions.
const SOURCE_TOMLS: &[(&str, &str)] = &[("chicago", include_str!("../sources/chicago.toml"))];

/// Returns all registered sources.
///
/// # Panics
///
/// Panics if any embedded TOML file fails to parse. These are compile-time
/// constants, so a parse failure is a development error caught by tests.
#[must_use]
pub fn all_sources() -> Vec<StudySource> {
    SOURCE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse study source '{name}': {e}"))
        })
        .collect()
}

/// Looks up a source by identifier.
///
/// # Errors
///
/// Returns [`IngestError::UnknownSource`] if no source has this id.
pub fn source(id: &str) -> Result<StudySource, IngestError> {
    all_sources()
        .into_iter()
        .find(|source| source.id == id)
        .ok_or_else(|| IngestError::UnknownSource(id.to_string()))
}
