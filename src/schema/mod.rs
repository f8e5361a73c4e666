//! Canonical shape of an extracted patient record.
//!
//! [`PatientRecord`] is the single output of a successful extraction. Its JSON
//! keys are exactly the ones [`crate::prompts::EXTRACTION_PROMPT`] asks the
//! model for, so a record serialised by this crate and an answer produced by
//! the model are interchangeable.
//!
//! ## Full key set, always
//!
//! Every leaf is an `Option` serialised without `skip_serializing_if`: a value
//! the model left out (or produced in an unusable shape) comes back as an
//! explicit `null`, never as a missing key. Sub-records the model omitted are
//! materialised with all-null leaves. See [`lenient`] for the coercion rules.
//!
//! ## Conformance
//!
//! Parsing never fails on content. Deviations that matter clinically
//! (identifier pattern, urgency range, malformed appointment timestamp, …)
//! are reported by [`PatientRecord::conformance_issues`] and logged by the
//! classifier instead of rejecting the whole record.

pub(crate) mod lenient;

use chrono::{DateTime, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

/// Identifier pattern requested from the model, e.g. `NAHED-2024-001`.
pub const PATIENT_ID_PATTERN: &str = r"^NAHED-\d{4}-\d{3}$";

static RE_PATIENT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(PATIENT_ID_PATTERN).unwrap());

/// The canonical structured output of the extraction pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    #[serde(default, deserialize_with = "lenient::text")]
    pub patient_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub clinical_data: ClinicalData,
    #[serde(default, deserialize_with = "lenient::record")]
    pub financial_profile: FinancialProfile,
    #[serde(default, deserialize_with = "lenient::record")]
    pub pharma_integration: PharmaIntegration,
    #[serde(default, deserialize_with = "lenient::record")]
    pub holistic_support: HolisticSupport,
    #[serde(default, deserialize_with = "lenient::record")]
    pub logistics: Logistics,
    #[serde(default, deserialize_with = "lenient::record")]
    pub diagnostic_summary: DiagnosticSummary,
    #[serde(default, deserialize_with = "lenient::record")]
    pub fibo_financial_mapping: FiboFinancialMapping,
}

// ── Clinical ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalData {
    #[serde(default, deserialize_with = "lenient::text")]
    pub diagnosis: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub stage: Option<String>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub biomarkers: Biomarkers,
    /// 0 (routine) to 1 (immediate).
    #[serde(default, deserialize_with = "lenient::number")]
    pub urgency_score: Option<Number>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub recommended_action: Option<String>,
}

impl ClinicalData {
    /// `urgency_score` as a float.
    pub fn urgency(&self) -> Option<f64> {
        as_f64(&self.urgency_score)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Biomarkers {
    #[serde(rename = "HER2", default, deserialize_with = "biomarker")]
    pub her2: Option<BiomarkerStatus>,
    #[serde(rename = "ER", default, deserialize_with = "biomarker")]
    pub er: Option<BiomarkerStatus>,
    #[serde(rename = "PR", default, deserialize_with = "biomarker")]
    pub pr: Option<BiomarkerStatus>,
}

/// Receptor status of a single biomarker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiomarkerStatus {
    Positive,
    Negative,
    Unknown,
}

impl BiomarkerStatus {
    /// Interpret the spellings models use (`"Positive (3+)"`, `"neg"`, `"+"`).
    /// Anything unrecognised, including IHC scores alone, is
    /// [`BiomarkerStatus::Unknown`].
    pub fn parse_loose(s: &str) -> Self {
        let s = s.trim().to_ascii_lowercase();
        if s.starts_with("pos") || s == "+" {
            BiomarkerStatus::Positive
        } else if s.starts_with("neg") || s == "-" {
            BiomarkerStatus::Negative
        } else {
            BiomarkerStatus::Unknown
        }
    }
}

fn biomarker<'de, D>(d: D) -> Result<Option<BiomarkerStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient::text(d)?.map(|s| BiomarkerStatus::parse_loose(&s)))
}

// ── Financial ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialProfile {
    #[serde(default, deserialize_with = "amount")]
    pub annual_income: Option<Amount>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub income_currency: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub country: Option<String>,
    /// `insured` / `uninsured` / `partial`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub insurance_status: Option<String>,
    /// Income classification tier, e.g. `Low-Income Household`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub fibo_class: Option<String>,
}

/// A monetary figure the model may give as a number or as free text
/// (`"24,000 EGP/year"`). Both are preserved as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(Number),
    Text(String),
}

fn amount<'de, D>(d: D) -> Result<Option<Amount>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => Some(Amount::Number(n)),
        Value::String(s) => Some(Amount::Text(s)),
        _ => None,
    })
}

// ── Pharma ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PharmaIntegration {
    #[serde(default, deserialize_with = "lenient::record")]
    pub drug_needed: DrugNeeded,
    #[serde(default, deserialize_with = "lenient::record")]
    pub eligibility_flags: EligibilityFlags,
    #[serde(default, deserialize_with = "lenient::record")]
    pub patient_access_program: PatientAccessProgram,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrugNeeded {
    #[serde(default, deserialize_with = "lenient::text")]
    pub generic_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub brand_options: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub treatment_duration_months: Option<Number>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub estimated_market_cost: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityFlags {
    #[serde(default, deserialize_with = "lenient::flag")]
    pub income_verified: Option<bool>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub clinical_need_verified: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientAccessProgram {
    #[serde(default, deserialize_with = "lenient::text")]
    pub program_name: Option<String>,
    /// 0–100.
    #[serde(default, deserialize_with = "lenient::number")]
    pub subsidy_percentage: Option<Number>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub application_status: Option<String>,
}

// ── Holistic support ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HolisticSupport {
    #[serde(default, deserialize_with = "lenient::record")]
    pub nutrition_plan: NutritionPlan,
    #[serde(default, deserialize_with = "lenient::record")]
    pub psychological_support: PsychologicalSupport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionPlan {
    #[serde(default, deserialize_with = "lenient::text")]
    pub regimen_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub focus: Option<String>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub recommended_foods: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub avoid: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub hydration_goal: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PsychologicalSupport {
    #[serde(default, deserialize_with = "lenient::text")]
    pub assessment: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub recommended_intervention: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub resource_assigned: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub support_session_available: Option<bool>,
}

// ── Logistics ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logistics {
    #[serde(default, deserialize_with = "lenient::text")]
    pub nearest_center: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub distance_km: Option<Number>,
    /// ISO 8601 calendar date and time, kept as the model wrote it.
    #[serde(default, deserialize_with = "lenient::text")]
    pub next_appointment: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub transport_support_needed: Option<bool>,
    #[serde(default, deserialize_with = "lenient::record_list")]
    pub ngo_contacts: Option<Vec<NgoContact>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NgoContact {
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub contact: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub support_type: Option<String>,
}

// ── Summary + funding ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    /// `High` / `Medium` / `Low`.
    #[serde(default, deserialize_with = "lenient::text")]
    pub urgency: Option<String>,
    /// Ordered clinical next steps.
    #[serde(default, deserialize_with = "lenient::text_list")]
    pub clinical_steps: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FiboFinancialMapping {
    #[serde(default, deserialize_with = "lenient::number")]
    pub estimated_total_cost: Option<Number>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub funding_sources: FundingSources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundingSources {
    #[serde(default, deserialize_with = "lenient::number")]
    pub patient_coverage: Option<Number>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub ngo_support: Option<Number>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub grant_pending: Option<Number>,
}

impl FundingSources {
    /// Sum of the sources that are present, `None` if all are null.
    pub fn total(&self) -> Option<f64> {
        let parts = [
            as_f64(&self.patient_coverage),
            as_f64(&self.ngo_support),
            as_f64(&self.grant_pending),
        ];
        if parts.iter().all(Option::is_none) {
            return None;
        }
        Some(parts.iter().flatten().sum())
    }
}

fn as_f64(n: &Option<Number>) -> Option<f64> {
    n.as_ref().and_then(Number::as_f64)
}

// ── Conformance ──────────────────────────────────────────────────────────

/// A non-fatal deviation from the documented schema constraints.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConformanceIssue {
    #[error("patient_id '{0}' does not match {pattern}", pattern = PATIENT_ID_PATTERN)]
    PatientIdPattern(String),

    #[error("urgency_score {0} outside [0, 1]")]
    UrgencyOutOfRange(f64),

    #[error("subsidy_percentage {0} outside [0, 100]")]
    SubsidyOutOfRange(f64),

    #[error("distance_km {0} is negative")]
    NegativeDistance(f64),

    #[error("next_appointment '{0}' is not an ISO 8601 date and time")]
    AppointmentNotDateTime(String),

    #[error("funding sources total {funded} exceeds estimated_total_cost {total}")]
    FundingExceedsCost { funded: f64, total: f64 },
}

impl PatientRecord {
    /// Build a record from an already-parsed JSON object.
    ///
    /// Field-level problems never fail; only a non-object top level does.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if !value.is_object() {
            return Err(serde::de::Error::custom("expected a JSON object"));
        }
        serde_json::from_value(value)
    }

    /// List every documented constraint this record violates.
    pub fn conformance_issues(&self) -> Vec<ConformanceIssue> {
        let mut issues = Vec::new();

        if let Some(id) = &self.patient_id {
            if !RE_PATIENT_ID.is_match(id) {
                issues.push(ConformanceIssue::PatientIdPattern(id.clone()));
            }
        }

        if let Some(u) = self.clinical_data.urgency() {
            if !(0.0..=1.0).contains(&u) {
                issues.push(ConformanceIssue::UrgencyOutOfRange(u));
            }
        }

        let program = &self.pharma_integration.patient_access_program;
        if let Some(p) = as_f64(&program.subsidy_percentage) {
            if !(0.0..=100.0).contains(&p) {
                issues.push(ConformanceIssue::SubsidyOutOfRange(p));
            }
        }

        if let Some(d) = as_f64(&self.logistics.distance_km) {
            if d < 0.0 {
                issues.push(ConformanceIssue::NegativeDistance(d));
            }
        }

        if let Some(appt) = &self.logistics.next_appointment {
            if !is_calendar_date_time(appt) {
                issues.push(ConformanceIssue::AppointmentNotDateTime(appt.clone()));
            }
        }

        let mapping = &self.fibo_financial_mapping;
        let funded = mapping.funding_sources.total();
        if let (Some(funded), Some(total)) = (funded, as_f64(&mapping.estimated_total_cost)) {
            // Allow rounding slack from models that split percentages.
            if funded > total * 1.01 + 1.0 {
                issues.push(ConformanceIssue::FundingExceedsCost { funded, total });
            }
        }

        issues
    }

    /// Clamp `urgency_score` into `[0, 1]`. Returns `true` if it changed.
    /// An in-range value is left exactly as written.
    pub fn clamp_urgency(&mut self) -> bool {
        match self.clinical_data.urgency() {
            Some(u) if !(0.0..=1.0).contains(&u) => {
                let bound: u8 = if u < 0.0 { 0 } else { 1 };
                self.clinical_data.urgency_score = Some(bound.into());
                true
            }
            _ => false,
        }
    }
}

/// Accepts RFC 3339 (`2024-03-01T09:30:00Z`) and zone-less ISO 8601
/// (`2024-03-01T09:30:00`, `2024-03-01T09:30`, space separator).
fn is_calendar_date_time(s: &str) -> bool {
    let s = s.trim();
    if DateTime::parse_from_rfc3339(s).is_ok() {
        return true;
    }
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .any(|fmt| NaiveDateTime::parse_from_str(s, fmt).is_ok())
}
