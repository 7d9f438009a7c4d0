use serde::{Deserialize, Serialize};
use std::fmt;

/// An (id, name) pair pointing at another entity of the specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    pub name: String,
}

impl Reference {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Whether a calculation comes from the funding template or was added by the author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalculationType {
    #[default]
    Template,
    Additional,
}

/// Stable identity of one calculation across runs.
///
/// This is what the specification lists as its calculation summaries; the
/// result set of every provider carries exactly one entry per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalculationIdentity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub calculation_type: CalculationType,
}

impl CalculationIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            calculation_type: CalculationType::Template,
        }
    }

    pub fn with_type(mut self, calculation_type: CalculationType) -> Self {
        self.calculation_type = calculation_type;
        self
    }

    pub fn reference(&self) -> Reference {
        Reference::new(self.id.clone(), self.name.clone())
    }
}

/// Everything a registered calculation entry point is tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationMetadata {
    pub identity: CalculationIdentity,
    pub calculation_specification: Option<Reference>,
    pub allocation_line: Option<Reference>,
    #[serde(default)]
    pub policy_specifications: Vec<Reference>,
}

impl CalculationMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        CalculationIdentity::new(id, name).into()
    }

    pub fn with_type(mut self, calculation_type: CalculationType) -> Self {
        self.identity.calculation_type = calculation_type;
        self
    }

    pub fn with_calculation_specification(mut self, reference: Reference) -> Self {
        self.calculation_specification = Some(reference);
        self
    }

    pub fn with_allocation_line(mut self, reference: Reference) -> Self {
        self.allocation_line = Some(reference);
        self
    }

    pub fn with_policy(mut self, reference: Reference) -> Self {
        self.policy_specifications.push(reference);
        self
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }
}

impl From<CalculationIdentity> for CalculationMetadata {
    fn from(identity: CalculationIdentity) -> Self {
        Self {
            identity,
            calculation_specification: None,
            allocation_line: None,
            policy_specifications: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_builder_keeps_identity() {
        let meta = CalculationMetadata::new("c1", "Pupil Led Funding")
            .with_type(CalculationType::Additional)
            .with_allocation_line(Reference::new("al1", "Core Funding"))
            .with_policy(Reference::new("p1", "Schools"))
            .with_policy(Reference::new("p2", "Academies"));

        assert_eq!(meta.id(), "c1");
        assert_eq!(meta.name(), "Pupil Led Funding");
        assert_eq!(meta.identity.calculation_type, CalculationType::Additional);
        assert_eq!(meta.policy_specifications.len(), 2);
        assert!(meta.calculation_specification.is_none());
    }

    #[test]
    fn identity_deserializes_without_type() {
        let identity: CalculationIdentity =
            serde_json::from_str(r#"{"id":"c1","name":"Calc"}"#).unwrap();
        assert_eq!(identity.calculation_type, CalculationType::Template);
    }
}
