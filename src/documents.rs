//! Record types extracted from medical billing documents.
//!
//! Three shapes flow through the pipeline, distinguished by the
//! `document_type` discriminator:
//!
//! | Discriminator | Type | Routed to |
//! |---------------|------|-----------|
//! | `medical_bill`  | [`MedicalBill`]  | price research |
//! | `insurance_eob` | [`InsuranceEob`] | denial analysis |
//! | `denial_letter` | [`DenialLetter`] | denial analysis |
//!
//! Field doc comments double as the schema descriptions the model sees, so
//! keep them short and literal.
//!
//! Scalars are optional because the model is told to emit `null` for
//! anything it cannot read. Amounts and identifiers are parsed leniently:
//! models regularly return `"$1,250.00"` for a number or `12345` for an id.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Which of the three record shapes a [`Document`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    MedicalBill,
    InsuranceEob,
    DenialLetter,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 3] = [
        DocumentKind::MedicalBill,
        DocumentKind::InsuranceEob,
        DocumentKind::DenialLetter,
    ];

    /// The discriminator value for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::MedicalBill => "medical_bill",
            DocumentKind::InsuranceEob => "insurance_eob",
            DocumentKind::DenialLetter => "denial_letter",
        }
    }

    pub fn from_discriminator(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted record, tagged by `document_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "document_type", rename_all = "snake_case")]
pub enum Document {
    MedicalBill(MedicalBill),
    InsuranceEob(InsuranceEob),
    DenialLetter(DenialLetter),
}

impl Document {
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::MedicalBill(_) => DocumentKind::MedicalBill,
            Document::InsuranceEob(_) => DocumentKind::InsuranceEob,
            Document::DenialLetter(_) => DocumentKind::DenialLetter,
        }
    }

    pub fn patient_name(&self) -> Option<&str> {
        match self {
            Document::MedicalBill(b) => b.patient_name.as_deref(),
            Document::InsuranceEob(e) => e.patient_name.as_deref(),
            Document::DenialLetter(d) => d.patient_name.as_deref(),
        }
    }
}

// ── Medical bill ─────────────────────────────────────────────────────────

/// Hospital or provider billing statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MedicalBill {
    /// Name of the medical provider
    #[serde(default)]
    pub hospital_name: Option<String>,
    /// City of the medical provider
    #[serde(default)]
    pub city: Option<String>,
    /// Country of the medical provider
    #[serde(default)]
    pub country: Option<String>,
    /// Name of the patient
    #[serde(default)]
    pub patient_name: Option<String>,
    /// Patient identifier
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub patient_id: Option<String>,
    /// Date of service (YYYY-MM-DD)
    #[serde(default)]
    pub date_of_service: Option<String>,
    /// Every charge line on the bill, in order
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(with = "Vec<Charge>")]
    pub charges: Vec<Charge>,
    /// Total amount billed
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub total_billed: Option<f64>,
    /// Amount already paid
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub amount_paid: Option<f64>,
    /// Amount still due
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub amount_due: Option<f64>,
    /// Payment due date (YYYY-MM-DD)
    #[serde(default)]
    pub due_date: Option<String>,
}

/// A single billed service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Charge {
    /// Medical service code (CPT/HCPCS), e.g. 99215
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub code: Option<String>,
    /// Description of the medical service
    #[serde(default)]
    pub description: Option<String>,
    /// Amount billed for this service
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub amount: Option<f64>,
    /// Associated diagnosis code (ICD-10)
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub diagnosis_code: Option<String>,
}

impl Charge {
    /// Best human label for the charge: description, else code.
    pub fn label(&self) -> &str {
        self.description
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or("unnamed charge")
    }
}

// ── Explanation of benefits ──────────────────────────────────────────────

/// Insurance Explanation of Benefits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InsuranceEob {
    /// Name of the insurance company
    #[serde(default)]
    pub insurance_company: Option<String>,
    /// Insurance policy number
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub policy_number: Option<String>,
    /// Name of the patient
    #[serde(default)]
    pub patient_name: Option<String>,
    /// Claim number
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub claim_number: Option<String>,
    /// Date of service (YYYY-MM-DD)
    #[serde(default)]
    pub date_of_service: Option<String>,
    /// Coverage for each service, in order
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(with = "Vec<CoverageLine>")]
    pub coverage_details: Vec<CoverageLine>,
    /// Total amount the patient has to pay
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub total_patient_responsibility: Option<f64>,
}

/// One service line on an EOB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CoverageLine {
    /// Description of the service
    #[serde(default)]
    pub service: Option<String>,
    /// Amount billed for the service
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub billed_amount: Option<f64>,
    /// Amount allowed by insurance
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub allowed_amount: Option<f64>,
    /// Amount paid by insurance
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub paid_by_insurance: Option<f64>,
    /// Amount the patient has to pay
    #[serde(default, deserialize_with = "lenient_amount")]
    #[schemars(with = "Option<f64>")]
    pub patient_responsibility: Option<f64>,
}

// ── Denial letter ────────────────────────────────────────────────────────

/// Insurance claim denial notice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DenialLetter {
    /// Name of the insurance company
    #[serde(default)]
    pub insurance_company: Option<String>,
    /// Name of the patient
    #[serde(default)]
    pub patient_name: Option<String>,
    /// Claim number
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub claim_number: Option<String>,
    /// Insurance policy number
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub policy_number: Option<String>,
    /// Policy or plan name
    #[serde(default)]
    pub policy_name: Option<String>,
    /// Date of service (YYYY-MM-DD)
    #[serde(default)]
    pub date_of_service: Option<String>,
    /// Services that were denied
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(with = "Vec<String>")]
    pub denied_services: Vec<String>,
    /// Reasons given for the denial
    #[serde(default, deserialize_with = "null_as_empty")]
    #[schemars(with = "Vec<String>")]
    pub denial_reasons: Vec<String>,
    /// Date the denial was issued (YYYY-MM-DD)
    #[serde(default)]
    pub denial_date: Option<String>,
    /// Deadline to file an appeal (YYYY-MM-DD)
    #[serde(default)]
    pub appeal_deadline: Option<String>,
    /// Instructions on how to file an appeal
    #[serde(default)]
    pub appeal_instructions: Option<String>,
}

// ── Lenient field parsing ────────────────────────────────────────────────

/// Accept a number, a numeric string (`"$1,250.00"`, `"₹5,500"`), or null.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => Ok(n.as_f64()),
        Some(serde_json::Value::String(s)) => parse_amount(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("not an amount: {s:?}"))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected an amount, got {other}"
        ))),
    }
}

/// Parse the first amount in a currency string.
///
/// Reads one numeric token (digits, `,` group separators, at most one `.`)
/// and ignores currency symbols before it and text after it, so
/// `"$79 (2 views)"` is 79. Returns `None` for strings with no digits
/// ("N/A", "unknown") and for ranges such as `"$100 - $150"`, which name no
/// single amount.
pub fn parse_amount(s: &str) -> Option<f64> {
    let first_digit = s.find(|c: char| c.is_ascii_digit())?;
    let prefix = &s[..first_digit];
    // A point directly before the first digit is a decimal (".50") unless it
    // ends an abbreviation ("Rs.5,500"); any other prefix is currency noise,
    // apart from a leading minus.
    let mut seen_point = prefix
        .strip_suffix('.')
        .is_some_and(|p| !p.ends_with(|c: char| c.is_alphabetic()));
    let negative = prefix.trim_start().starts_with('-') || prefix.trim_end().ends_with('-');

    let bytes = s.as_bytes();
    let mut token = String::from(if seen_point { "." } else { "" });
    let mut end = first_digit;
    while let Some(&b) = bytes.get(end) {
        let digit_follows = bytes.get(end + 1).is_some_and(|n| n.is_ascii_digit());
        match b {
            b'0'..=b'9' => token.push(char::from(b)),
            b',' if !seen_point && digit_follows => {}
            b'.' if !seen_point && digit_follows => {
                seen_point = true;
                token.push('.');
            }
            _ => break,
        }
        end += 1;
    }

    if is_range_tail(&s[end..]) {
        return None;
    }
    let value: f64 = token.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Whether the text after an amount continues it into a range
/// (`"- $150"`, `"–150"`, `"to 150"`).
fn is_range_tail(rest: &str) -> bool {
    let rest = rest.trim_start();
    let upper = ['-', '\u{2013}', '\u{2014}', '~']
        .into_iter()
        .find_map(|dash| rest.strip_prefix(dash))
        .or_else(|| {
            rest.strip_prefix("to")
                .filter(|r| !r.starts_with(|c: char| c.is_alphanumeric()))
        });
    upper.is_some_and(|r| r.contains(|c: char| c.is_ascii_digit()))
}

/// Accept a string, a number or a bool as a string; null stays `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string, got {other}"
        ))),
    }
}

/// Treat an explicit `null` list as empty.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
