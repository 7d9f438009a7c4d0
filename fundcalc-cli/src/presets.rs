//! Built-in model presets.
//!
//! A preset stands in for a compiled specification: it declares the
//! schema (row shapes and relationship slots) and registers its
//! calculations in a fixed order.

use anyhow::{bail, Result};
use rust_decimal::Decimal;

use fundcalc_core::aggregation::{AggregationType, DatasetField, DatasetFieldType};
use fundcalc_core::domain::{CalculationMetadata, CalculationType, Granularity, Reference};
use fundcalc_core::model::{
    checked_div, checked_mul, CalculationError, ModelDefinition, ModelDefinitionBuilder,
    ModelInstance, ModelSchema, RelationshipSlotSchema, RowShape, ScalarType,
};

/// Named model presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPreset {
    PupilFunding,
    HighNeeds,
}

impl ModelPreset {
    pub fn all() -> &'static [ModelPreset] {
        &[Self::PupilFunding, Self::HighNeeds]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PupilFunding => "pupil_funding",
            Self::HighNeeds => "high_needs",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::PupilFunding => {
                "per-pupil, deprivation and premises funding with a national pupil share"
            }
            Self::HighNeeds => "place funding for high needs providers",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match Self::all().iter().find(|p| p.name().eq_ignore_ascii_case(name)) {
            Some(preset) => Ok(*preset),
            None => {
                let valid: Vec<&str> = Self::all().iter().map(|p| p.name()).collect();
                bail!("unknown preset '{name}'. Valid: {}", valid.join(", "))
            }
        }
    }

    pub fn schema(self) -> ModelSchema {
        match self {
            Self::PupilFunding => pupil_funding_schema(),
            Self::HighNeeds => high_needs_schema(),
        }
    }

    /// Build the Model Definition under `specification_id`.
    pub fn build(self, specification_id: &str) -> Result<ModelDefinition> {
        let builder = ModelDefinition::builder(specification_id).schema(self.schema());
        let builder = match self {
            Self::PupilFunding => register_pupil_funding(builder),
            Self::HighNeeds => register_high_needs(builder),
        };
        Ok(builder.build()?)
    }
}

/// Dataset table columns for a row shape: numeric fields are aggregable.
pub fn dataset_fields(shape: &RowShape) -> Vec<DatasetField> {
    shape
        .fields
        .iter()
        .map(|field| {
            let field_type = match field.scalar_type {
                ScalarType::Decimal => DatasetFieldType::Decimal,
                ScalarType::Int32 | ScalarType::Int64 => DatasetFieldType::Integer,
                ScalarType::PassThrough => DatasetFieldType::Text,
            };
            DatasetField::new(field.source_name.clone(), field_type, field_type.is_numeric())
        })
        .collect()
}

// ─── Pupil funding ───────────────────────────────────────────────────

const PRIMARY_RATE: i64 = 3_500;
const SECONDARY_RATE: i64 = 4_800;
const FSM_RATE: i64 = 470;
const ACADEMY_LUMP_SUM: i64 = 110_000;

fn pupil_funding_schema() -> ModelSchema {
    ModelSchema::new()
        .with_shape(
            RowShape::new("PupilNumbers")
                .field("NumberOnRoll", ScalarType::Int32)
                .field("PrimaryPupils", ScalarType::Int32)
                .field("SecondaryPupils", ScalarType::Int32)
                .field("FsmPercent", ScalarType::Decimal),
        )
        .with_shape(
            RowShape::new("Sites")
                .field("SiteName", ScalarType::PassThrough)
                .field("Area", ScalarType::Decimal)
                .field("Rates", ScalarType::Decimal),
        )
        .with_slot(RelationshipSlotSchema::new(
            "rel-pupil-numbers",
            "PupilNumbers",
            "PupilNumbers",
            Granularity::SingleRowPerProvider,
        ))
        .with_slot(RelationshipSlotSchema::new(
            "rel-sites",
            "Sites",
            "Sites",
            Granularity::MultipleRowsPerProvider,
        ))
        .with_all_provider_attributes()
}

fn basic_entitlement(m: &ModelInstance) -> Result<Decimal, CalculationError> {
    let pupils = m.datasets().single("PupilNumbers")?;
    let primary = checked_mul(
        Decimal::from(pupils.int32("PrimaryPupils")?),
        Decimal::from(PRIMARY_RATE),
    )?;
    let secondary = checked_mul(
        Decimal::from(pupils.int32("SecondaryPupils")?),
        Decimal::from(SECONDARY_RATE),
    )?;
    primary.checked_add(secondary).ok_or(CalculationError::Overflow)
}

fn register_pupil_funding(builder: ModelDefinitionBuilder) -> ModelDefinitionBuilder {
    let pupil_led = Reference::new("al-pupil-led", "Pupil Led Factors");
    let premises = Reference::new("al-premises", "Premises");

    builder
        .calculation(
            CalculationMetadata::new("calc-basic-entitlement", "Basic Entitlement")
                .with_allocation_line(pupil_led.clone()),
            basic_entitlement,
        )
        .calculation(
            CalculationMetadata::new("calc-fsm", "Free School Meals")
                .with_allocation_line(pupil_led),
            |m| {
                let pupils = m.datasets().single("PupilNumbers")?;
                let eligible = checked_div(
                    checked_mul(
                        Decimal::from(pupils.int32("NumberOnRoll")?),
                        pupils.decimal("FsmPercent")?,
                    )?,
                    Decimal::ONE_HUNDRED,
                )?;
                checked_mul(eligible.round_dp(0), Decimal::from(FSM_RATE))
            },
        )
        .calculation(
            CalculationMetadata::new("calc-premises", "Premises Rates").with_allocation_line(premises),
            |m| {
                m.datasets()
                    .many("Sites")?
                    .iter()
                    .try_fold(Decimal::ZERO, |acc, site| {
                        site.decimal("Rates").map(|rates| acc + rates)
                    })
            },
        )
        .calculation(
            CalculationMetadata::new("calc-national-share", "National Pupil Share")
                .with_type(CalculationType::Additional),
            |m| {
                let total = m.aggregate("Datasets.PupilNumbers.NumberOnRoll", AggregationType::Sum)?;
                let pupils = m.datasets().single("PupilNumbers")?.decimal("NumberOnRoll")?;
                checked_div(pupils, total)
            },
        )
        .calculation(
            CalculationMetadata::new("calc-entitlement-vs-average", "Entitlement Versus Average")
                .with_type(CalculationType::Additional),
            |m| {
                let average = m.aggregate("BasicEntitlement", AggregationType::Average)?;
                if average.is_zero() {
                    return Ok(Decimal::ZERO);
                }
                checked_div(basic_entitlement(m)?, average)
            },
        )
        .calculation(
            CalculationMetadata::new("calc-academy-lump-sum", "Academy Lump Sum"),
            |m| {
                let provider_type = m.provider().text("ProviderType")?;
                Ok(if provider_type.eq_ignore_ascii_case("Academy") {
                    Decimal::from(ACADEMY_LUMP_SUM)
                } else {
                    Decimal::ZERO
                })
            },
        )
}

// ─── High needs ──────────────────────────────────────────────────────

const PLACE_RATE: i64 = 10_000;

fn high_needs_schema() -> ModelSchema {
    ModelSchema::new()
        .with_shape(
            RowShape::new("HighNeedsPlaces")
                .field("Places", ScalarType::Int32)
                .field("TopUp", ScalarType::Decimal),
        )
        .with_slot(RelationshipSlotSchema::new(
            "rel-high-needs-places",
            "HighNeedsPlaces",
            "HighNeedsPlaces",
            Granularity::SingleRowPerProvider,
        ))
        .with_provider_attributes(["Name", "ProviderType"])
}

fn register_high_needs(builder: ModelDefinitionBuilder) -> ModelDefinitionBuilder {
    builder
        .calculation(CalculationMetadata::new("calc-place-funding", "Place Funding"), |m| {
            let places = m.datasets().single("HighNeedsPlaces")?.int32("Places")?;
            checked_mul(Decimal::from(places), Decimal::from(PLACE_RATE))
        })
        .calculation(CalculationMetadata::new("calc-top-up", "Top Up Funding"), |m| {
            m.datasets().single("HighNeedsPlaces")?.decimal("TopUp")
        })
}
