//! Source identifiers generated from human-readable names.
//!
//! Calculation and dataset names are free text ("Pupil Led Funding"); code
//! and aggregation keys refer to them through a deterministic identifier
//! ("PupilLedFunding"). Comparison of identifiers is case-insensitive.

/// Generate the source identifier for a name.
///
/// Letters, digits and `_` are kept in their original case; everything
/// else is dropped. A leading digit gets a `_` prefix.
pub fn generate_identifier(name: &str) -> String {
    let mut identifier: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if identifier.chars().next().is_some_and(|c| c.is_numeric()) {
        identifier.insert(0, '_');
    }
    identifier
}

/// Case-insensitive identifier equality.
pub fn identifiers_match(left: &str, right: &str) -> bool {
    left == right || identifier_key(left) == identifier_key(right)
}

/// Lookup key under which matching identifiers collide.
pub fn identifier_key(name: &str) -> String {
    name.to_lowercase()
}
