//! Provider summary and the fixed set of provider attributes a model can bind.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Flat, read-only record describing one provider for the duration of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSummary {
    pub id: String,
    pub name: Option<String>,
    pub ukprn: Option<String>,
    pub urn: Option<String>,
    pub upin: Option<String>,
    pub dfe_establishment_number: Option<String>,
    pub establishment_number: Option<String>,
    pub legal_name: Option<String>,
    pub authority: Option<String>,
    pub provider_type: Option<String>,
    pub provider_sub_type: Option<String>,
    #[serde(deserialize_with = "optional_date")]
    pub date_opened: Option<NaiveDateTime>,
    #[serde(deserialize_with = "optional_date")]
    pub date_closed: Option<NaiveDateTime>,
    pub la_code: Option<String>,
    pub crm_account_id: Option<String>,
    pub nav_vendor_no: Option<String>,
    pub status: Option<String>,
    pub phase_of_education: Option<String>,
}

impl ProviderSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_ukprn(mut self, ukprn: impl Into<String>) -> Self {
        self.ukprn = Some(ukprn.into());
        self
    }
}

/// Parse a provider date: a full timestamp (`T` or space separated) or a
/// bare `YYYY-MM-DD` date, which reads as midnight.
fn parse_provider_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    text.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(text) if text.trim().is_empty() => Ok(None),
        Some(text) => parse_provider_date(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid provider date '{text}'"))),
    }
}

/// Provider attributes recognized by the binder.
///
/// A model may declare any attribute name on its provider shape; only these
/// are copied from the [`ProviderSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderAttribute {
    DateOpened,
    ProviderType,
    ProviderSubType,
    Name,
    Ukprn,
    Urn,
    Upin,
    DfeEstablishmentNumber,
    EstablishmentNumber,
    LegalName,
    Authority,
    DateClosed,
    LaCode,
    CrmAccountId,
    NavVendorNo,
    Status,
    PhaseOfEducation,
}

/// Borrowed value of one provider attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue<'a> {
    Text(Option<&'a str>),
    Date(Option<NaiveDateTime>),
}

impl ProviderAttribute {
    pub const ALL: [ProviderAttribute; 17] = [
        Self::DateOpened,
        Self::ProviderType,
        Self::ProviderSubType,
        Self::Name,
        Self::Ukprn,
        Self::Urn,
        Self::Upin,
        Self::DfeEstablishmentNumber,
        Self::EstablishmentNumber,
        Self::LegalName,
        Self::Authority,
        Self::DateClosed,
        Self::LaCode,
        Self::CrmAccountId,
        Self::NavVendorNo,
        Self::Status,
        Self::PhaseOfEducation,
    ];

    /// Attribute name as declared on a model's provider shape.
    pub fn name(self) -> &'static str {
        match self {
            Self::DateOpened => "DateOpened",
            Self::ProviderType => "ProviderType",
            Self::ProviderSubType => "ProviderSubType",
            Self::Name => "Name",
            Self::Ukprn => "UKPRN",
            Self::Urn => "URN",
            Self::Upin => "UPIN",
            Self::DfeEstablishmentNumber => "DfeEstablishmentNumber",
            Self::EstablishmentNumber => "EstablishmentNumber",
            Self::LegalName => "LegalName",
            Self::Authority => "Authority",
            Self::DateClosed => "DateClosed",
            Self::LaCode => "LACode",
            Self::CrmAccountId => "CrmAccountId",
            Self::NavVendorNo => "NavVendorNo",
            Self::Status => "Status",
            Self::PhaseOfEducation => "PhaseOfEducation",
        }
    }

    /// Exact, case-sensitive lookup by declared name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.name() == name)
    }

    pub fn value(self, provider: &ProviderSummary) -> AttributeValue<'_> {
        match self {
            Self::DateOpened => AttributeValue::Date(provider.date_opened),
            Self::DateClosed => AttributeValue::Date(provider.date_closed),
            Self::ProviderType => AttributeValue::Text(provider.provider_type.as_deref()),
            Self::ProviderSubType => AttributeValue::Text(provider.provider_sub_type.as_deref()),
            Self::Name => AttributeValue::Text(provider.name.as_deref()),
            Self::Ukprn => AttributeValue::Text(provider.ukprn.as_deref()),
            Self::Urn => AttributeValue::Text(provider.urn.as_deref()),
            Self::Upin => AttributeValue::Text(provider.upin.as_deref()),
            Self::DfeEstablishmentNumber => {
                AttributeValue::Text(provider.dfe_establishment_number.as_deref())
            }
            Self::EstablishmentNumber => {
                AttributeValue::Text(provider.establishment_number.as_deref())
            }
            Self::LegalName => AttributeValue::Text(provider.legal_name.as_deref()),
            Self::Authority => AttributeValue::Text(provider.authority.as_deref()),
            Self::LaCode => AttributeValue::Text(provider.la_code.as_deref()),
            Self::CrmAccountId => AttributeValue::Text(provider.crm_account_id.as_deref()),
            Self::NavVendorNo => AttributeValue::Text(provider.nav_vendor_no.as_deref()),
            Self::Status => AttributeValue::Text(provider.status.as_deref()),
            Self::PhaseOfEducation => AttributeValue::Text(provider.phase_of_education.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_attribute_round_trips_through_its_name() {
        for attr in ProviderAttribute::ALL {
            assert_eq!(ProviderAttribute::from_name(attr.name()), Some(attr));
        }
    }

    #[test]
    fn attribute_lookup_is_case_sensitive() {
        assert_eq!(
            ProviderAttribute::from_name("UKPRN"),
            Some(ProviderAttribute::Ukprn)
        );
        assert_eq!(ProviderAttribute::from_name("ukprn"), None);
        assert_eq!(ProviderAttribute::from_name("Postcode"), None);
    }

    #[test]
    fn dates_accept_timestamps_and_bare_dates() {
        let midnight = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_provider_date("2020-01-01"), Some(midnight));
        assert_eq!(parse_provider_date("2020-01-01T00:00:00"), Some(midnight));
        assert_eq!(parse_provider_date(" 2020-01-01 00:00:00 "), Some(midnight));
        assert_eq!(parse_provider_date("01/01/2020"), None);
    }

    #[test]
    fn summary_deserializes_bare_dates() {
        let provider: ProviderSummary = serde_json::from_str(
            r#"{"id":"p1","date_opened":"2015-09-01","date_closed":null}"#,
        )
        .unwrap();
        assert_eq!(
            provider.date_opened,
            NaiveDate::from_ymd_opt(2015, 9, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(provider.date_closed, None);

        let json = serde_json::to_string(&provider).unwrap();
        assert_eq!(serde_json::from_str::<ProviderSummary>(&json).unwrap(), provider);

        let err = serde_json::from_str::<ProviderSummary>(r#"{"id":"p1","date_opened":"soon"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn value_reads_from_summary() {
        let provider = ProviderSummary::new("p1").with_name("Oak Primary");
        assert_eq!(
            ProviderAttribute::Name.value(&provider),
            AttributeValue::Text(Some("Oak Primary"))
        );
        assert_eq!(
            ProviderAttribute::Urn.value(&provider),
            AttributeValue::Text(None)
        );
        assert_eq!(
            ProviderAttribute::DateOpened.value(&provider),
            AttributeValue::Date(None)
        );
    }
}
