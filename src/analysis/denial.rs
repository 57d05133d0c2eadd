//! Insurance denial analysis and appeal strategy.
//!
//! All coverage documents of a request (denial letters and EOBs) are
//! analyzed together in one research loop, since they usually describe the
//! same claim. Identity fields the model leaves out are filled from the
//! documents themselves.

use crate::agent::{ResearchAgent, ResearchLog};
use crate::analysis::{optional_amount, AnalysisKind};
use crate::config::AdvocateConfig;
use crate::documents::{DenialLetter, InsuranceEob};
use crate::error::AdvocateError;
use crate::pipeline::llm::ModelBackend;
use crate::prompts;
use crate::search::SearchProvider;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;
use tracing::info;

/// Whether a denial holds up against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum DenialVerdict {
    Justified,
    Unjustified,
    #[serde(rename = "Needs clarification")]
    NeedsClarification,
}

impl DenialVerdict {
    /// Worth appealing.
    pub fn is_appealable(self) -> bool {
        !matches!(self, DenialVerdict::Justified)
    }
}

impl fmt::Display for DenialVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenialVerdict::Justified => "Justified",
            DenialVerdict::Unjustified => "Unjustified",
            DenialVerdict::NeedsClarification => "Needs clarification",
        })
    }
}

impl FromStr for DenialVerdict {
    type Err = String;

    /// Accepts the bare label or the label followed by prose, e.g.
    /// `"Justified - denial aligns with policy terms"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower.starts_with("unjustified") || lower.starts_with("not justified") {
            Ok(DenialVerdict::Unjustified)
        } else if lower.starts_with("justified") {
            Ok(DenialVerdict::Justified)
        } else if lower.starts_with("needs clarification")
            || lower.starts_with("needs_clarification")
            || lower.starts_with("unclear")
        {
            Ok(DenialVerdict::NeedsClarification)
        } else {
            Err(format!("unknown denial verdict: {s:?}"))
        }
    }
}

impl TryFrom<String> for DenialVerdict {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Qualitative chance that an appeal succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum SuccessLikelihood {
    Low,
    Medium,
    High,
}

impl fmt::Display for SuccessLikelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SuccessLikelihood::Low => "Low",
            SuccessLikelihood::Medium => "Medium",
            SuccessLikelihood::High => "High",
        })
    }
}

impl FromStr for SuccessLikelihood {
    type Err = String;

    /// Uses the first word, so `"Medium - depends on lab reports"` is Medium.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let first = s
            .trim()
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match first.as_str() {
            "high" => Ok(SuccessLikelihood::High),
            "medium" | "moderate" => Ok(SuccessLikelihood::Medium),
            "low" => Ok(SuccessLikelihood::Low),
            _ => Err(format!("unknown success likelihood: {s:?}")),
        }
    }
}

impl TryFrom<String> for SuccessLikelihood {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Verdict on one denied item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenialAnalysisItem {
    #[serde(default)]
    pub denied_item: String,
    #[serde(default, deserialize_with = "optional_amount")]
    pub denied_amount: Option<f64>,
    #[serde(default)]
    pub denial_reason: Option<String>,
    #[serde(default)]
    pub policy_terms_found: Option<String>,
    pub verdict: DenialVerdict,
    #[serde(default, deserialize_with = "string_or_list")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppealStrategy {
    /// Filled from the item verdicts, or from the letters when there are no
    /// items, when the model leaves it out. Always set on a result returned
    /// by [`analyze_denial`]; `None` only in hand-built or external values.
    #[serde(default)]
    pub is_appeal_recommended: Option<bool>,
    #[serde(default)]
    pub appeal_deadline: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub required_documents: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub appeal_process: Vec<String>,
    #[serde(default, deserialize_with = "lenient_likelihood")]
    pub success_likelihood: Option<SuccessLikelihood>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub key_arguments: Vec<String>,
}

/// Result of analyzing a request's denial letters and EOBs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsuranceAnalysis {
    #[serde(default)]
    pub insurance_company: Option<String>,
    #[serde(default)]
    pub policy_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub policy_number: Option<String>,
    #[serde(default)]
    pub denial_analysis: Vec<DenialAnalysisItem>,
    #[serde(default)]
    pub appeal_strategy: AppealStrategy,
    #[serde(default, deserialize_with = "string_or_list")]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub research: ResearchLog,
}

/// A coverage document to analyze.
#[derive(Debug, Clone, Copy)]
pub enum CoverageDispute<'a> {
    Denial(&'a DenialLetter),
    Eob(&'a InsuranceEob),
}

/// Analyze `disputes` in one research loop.
///
/// # Errors
/// [`AdvocateError::Internal`] for an empty slice; otherwise whatever the
/// research loop returns.
pub async fn analyze_denial(
    disputes: &[CoverageDispute<'_>],
    backend: &dyn ModelBackend,
    search: &dyn SearchProvider,
    config: &AdvocateConfig,
) -> Result<InsuranceAnalysis, AdvocateError> {
    if disputes.is_empty() {
        return Err(AdvocateError::Internal(
            "denial analysis needs at least one coverage document".into(),
        ));
    }
    info!("Analyzing {} coverage document(s)", disputes.len());

    let agent = ResearchAgent::new(backend, search, config);
    let (mut analysis, log): (InsuranceAnalysis, _) = agent
        .run(
            AnalysisKind::DenialAnalysis,
            prompts::DENIAL_ANALYSIS_SYSTEM_PROMPT,
            &denial_task(disputes),
        )
        .await?;

    fill_from_documents(&mut analysis, disputes);
    analysis.research = log;
    Ok(analysis)
}

/// Copy identity and deadline fields from the documents where the model
/// returned nothing.
fn fill_from_documents(analysis: &mut InsuranceAnalysis, disputes: &[CoverageDispute<'_>]) {
    for dispute in disputes {
        match dispute {
            CoverageDispute::Denial(letter) => {
                fill(&mut analysis.insurance_company, &letter.insurance_company);
                fill(&mut analysis.policy_name, &letter.policy_name);
                fill(&mut analysis.policy_number, &letter.policy_number);
                fill(
                    &mut analysis.appeal_strategy.appeal_deadline,
                    &letter.appeal_deadline,
                );
            }
            CoverageDispute::Eob(eob) => {
                fill(&mut analysis.insurance_company, &eob.insurance_company);
                fill(&mut analysis.policy_number, &eob.policy_number);
            }
        }
    }

    // The model's call wins; then the item verdicts; then whether any letter
    // actually denies something.
    if analysis.appeal_strategy.is_appeal_recommended.is_none() {
        let appealable = if analysis.denial_analysis.is_empty() {
            disputes.iter().any(|dispute| match dispute {
                CoverageDispute::Denial(letter) => {
                    !letter.denied_services.is_empty() || !letter.denial_reasons.is_empty()
                }
                CoverageDispute::Eob(_) => false,
            })
        } else {
            analysis
                .denial_analysis
                .iter()
                .any(|item| item.verdict.is_appealable())
        };
        analysis.appeal_strategy.is_appeal_recommended = Some(appealable);
    }
}

fn fill(target: &mut Option<String>, source: &Option<String>) {
    let empty = target.as_deref().map_or(true, |s| s.trim().is_empty());
    if empty && source.is_some() {
        target.clone_from(source);
    }
}

/// The coverage documents as the model sees them.
fn denial_task(disputes: &[CoverageDispute<'_>]) -> String {
    let mut task = String::from("Analyze these insurance coverage documents for the same patient.\n");
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".into());
    let money = |v: Option<f64>| v.map(|a| format!("{a:.2}")).unwrap_or_else(|| "?".into());

    for (i, dispute) in disputes.iter().enumerate() {
        match dispute {
            CoverageDispute::Denial(letter) => {
                let _ = writeln!(task, "\nDocument {}: denial letter", i + 1);
                let _ = writeln!(task, "Insurance company: {}", opt(&letter.insurance_company));
                let _ = writeln!(task, "Policy name: {}", opt(&letter.policy_name));
                let _ = writeln!(task, "Policy number: {}", opt(&letter.policy_number));
                let _ = writeln!(task, "Claim number: {}", opt(&letter.claim_number));
                let _ = writeln!(task, "Date of service: {}", opt(&letter.date_of_service));
                let _ = writeln!(task, "Denial date: {}", opt(&letter.denial_date));
                let _ = writeln!(task, "Appeal deadline: {}", opt(&letter.appeal_deadline));
                let _ = writeln!(task, "Denied services:");
                for service in &letter.denied_services {
                    let _ = writeln!(task, "- {service}");
                }
                let _ = writeln!(task, "Denial reasons:");
                for reason in &letter.denial_reasons {
                    let _ = writeln!(task, "- {reason}");
                }
                if let Some(ref instructions) = letter.appeal_instructions {
                    let _ = writeln!(task, "Appeal instructions: {instructions}");
                }
            }
            CoverageDispute::Eob(eob) => {
                let _ = writeln!(task, "\nDocument {}: explanation of benefits", i + 1);
                let _ = writeln!(task, "Insurance company: {}", opt(&eob.insurance_company));
                let _ = writeln!(task, "Policy number: {}", opt(&eob.policy_number));
                let _ = writeln!(task, "Claim number: {}", opt(&eob.claim_number));
                let _ = writeln!(task, "Date of service: {}", opt(&eob.date_of_service));
                let _ = writeln!(task, "Services (billed / allowed / paid by insurance / patient owes):");
                for line in &eob.coverage_details {
                    let _ = writeln!(
                        task,
                        "- {}: {} / {} / {} / {}",
                        line.service.as_deref().unwrap_or("unnamed service"),
                        money(line.billed_amount),
                        money(line.allowed_amount),
                        money(line.paid_by_insurance),
                        money(line.patient_responsibility),
                    );
                }
                let _ = writeln!(
                    task,
                    "Total patient responsibility: {}",
                    money(eob.total_patient_responsibility)
                );
            }
        }
    }
    task
}

// ── Lenient fields ───────────────────────────────────────────────────────

/// Accept a list of strings, a single string, or null.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<serde_json::Value>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
    })
}

/// "N/A" and other unrecognised tiers read as absent.
fn lenient_likelihood<'de, D>(deserializer: D) -> Result<Option<SuccessLikelihood>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<serde_json::Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok()))
}

/// Identifiers sometimes come back as numbers.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
