//! Analyses run on extracted records.
//!
//! - [`price`]: fair-price research for a medical bill
//! - [`denial`]: denial adjudication and appeal strategy for denial letters
//!   and EOBs
//!
//! Both drive the research loop in [`crate::agent`] and keep its log in
//! their report for source attribution.

pub mod denial;
pub mod price;

use crate::documents::parse_amount;
use crate::pipeline::llm::RequestPurpose;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Which analysis component an event or result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    PriceResearch,
    DenialAnalysis,
}

impl AnalysisKind {
    pub fn purpose(self) -> RequestPurpose {
        match self {
            AnalysisKind::PriceResearch => RequestPurpose::PriceResearch,
            AnalysisKind::DenialAnalysis => RequestPurpose::DenialAnalysis,
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.purpose().fmt(f)
    }
}

/// Amount reported by a research answer.
///
/// Research answers say "N/A" or "not found" where a record would say
/// `null`; anything without a number is absent rather than an error.
pub(crate) fn optional_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => parse_amount(&s),
        _ => None,
    })
}
