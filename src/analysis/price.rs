//! Fair-price research for a medical bill.
//!
//! The model only looks up benchmarks (a government reference rate such as
//! Medicare, and a commercial average) for each charge line. Verdicts,
//! overcharges and totals are computed here from those numbers so they are
//! reproducible and follow [`PriceThresholds`].

use crate::agent::{ResearchAgent, ResearchLog};
use crate::analysis::{optional_amount, AnalysisKind};
use crate::config::{AdvocateConfig, PriceThresholds};
use crate::documents::{Charge, MedicalBill};
use crate::error::AdvocateError;
use crate::pipeline::llm::ModelBackend;
use crate::prompts;
use crate::search::SearchProvider;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fmt::Write as _;
use tracing::{info, warn};

/// Ordered from most to least favourable to the patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriceVerdict {
    #[serde(rename = "Good price")]
    GoodPrice,
    Fair,
    Overpriced,
    #[serde(rename = "Significantly overpriced")]
    SignificantlyOverpriced,
}

impl fmt::Display for PriceVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PriceVerdict::GoodPrice => "Good price",
            PriceVerdict::Fair => "Fair",
            PriceVerdict::Overpriced => "Overpriced",
            PriceVerdict::SignificantlyOverpriced => "Significantly overpriced",
        })
    }
}

/// Place a billed amount on the verdict scale.
///
/// First match wins: over the reference multiple, over the commercial
/// multiple, below every known benchmark, otherwise fair. With no benchmark
/// at all the verdict is [`PriceVerdict::Fair`].
pub fn classify_price(
    billed: f64,
    reference_rate: Option<f64>,
    commercial_average: Option<f64>,
    thresholds: &PriceThresholds,
) -> PriceVerdict {
    if let Some(reference) = reference_rate {
        if billed > thresholds.severe_reference_multiple * reference {
            return PriceVerdict::SignificantlyOverpriced;
        }
    }
    if let Some(commercial) = commercial_average {
        if billed > thresholds.overpriced_commercial_multiple * commercial {
            return PriceVerdict::Overpriced;
        }
    }
    let lowest = [reference_rate, commercial_average]
        .into_iter()
        .flatten()
        .reduce(f64::min);
    match lowest {
        Some(lowest) if billed < lowest => PriceVerdict::GoodPrice,
        _ => PriceVerdict::Fair,
    }
}

/// Amount billed above the commercial average (else the reference rate),
/// floored at zero. `None` without a benchmark.
pub fn overcharge(billed: f64, reference_rate: Option<f64>, commercial_average: Option<f64>) -> Option<f64> {
    commercial_average
        .or(reference_rate)
        .map(|benchmark| (billed - benchmark).max(0.0))
}

// ── Model answer ─────────────────────────────────────────────────────────

/// Benchmarks found for one charge line.
#[derive(Debug, Clone, Default, Deserialize)]
struct RateEstimate {
    /// Index into the bill's charges; the estimate's position when absent.
    #[serde(default, deserialize_with = "optional_line")]
    line: Option<usize>,
    #[serde(default, deserialize_with = "optional_amount")]
    medicare_rate: Option<f64>,
    #[serde(default, deserialize_with = "optional_amount")]
    commercial_average: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
}

/// Accept `0`, `"0"` or `"line 0"`; anything else leaves the line unset.
fn optional_line<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => {
            let digits: String = s
                .trim()
                .trim_start_matches(|c: char| !c.is_ascii_digit())
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        }
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct RateResearch {
    #[serde(default)]
    estimates: Vec<RateEstimate>,
}

// ── Report ───────────────────────────────────────────────────────────────

/// Assessment of one charge line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureAssessment {
    pub procedure_code: Option<String>,
    pub procedure_name: String,
    pub billed_amount: Option<f64>,
    /// Government reference rate (Medicare or the local equivalent).
    pub medicare_rate: Option<f64>,
    pub commercial_average: Option<f64>,
    pub overcharge_amount: Option<f64>,
    pub verdict: PriceVerdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub total_billed: f64,
    pub total_medicare: Option<f64>,
    pub total_commercial: Option<f64>,
    pub total_overcharge: Option<f64>,
    pub overall_verdict: PriceVerdict,
}

impl PriceSummary {
    /// Aggregate line assessments. Benchmark totals are sums over the lines
    /// that have one, and absent when none do.
    pub fn from_procedures(procedures: &[ProcedureAssessment]) -> Self {
        let sum = |f: fn(&ProcedureAssessment) -> Option<f64>| {
            procedures.iter().filter_map(f).reduce(|a, b| a + b)
        };
        Self {
            total_billed: sum(|p| p.billed_amount).unwrap_or(0.0),
            total_medicare: sum(|p| p.medicare_rate),
            total_commercial: sum(|p| p.commercial_average),
            total_overcharge: sum(|p| p.overcharge_amount),
            overall_verdict: procedures
                .iter()
                .map(|p| p.verdict)
                .max()
                .unwrap_or(PriceVerdict::Fair),
        }
    }
}

/// Result of price research on one bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceReport {
    pub hospital_name: Option<String>,
    pub patient_name: Option<String>,
    pub procedures: Vec<ProcedureAssessment>,
    pub summary: PriceSummary,
    pub research: ResearchLog,
}

/// Research benchmarks for every charge on `bill` and grade them.
///
/// A bill without charges is reported as-is; the model is not called.
pub async fn research_prices(
    bill: &MedicalBill,
    backend: &dyn ModelBackend,
    search: &dyn SearchProvider,
    config: &AdvocateConfig,
) -> Result<PriceReport, AdvocateError> {
    let provider = bill.hospital_name.as_deref().unwrap_or("unknown provider");
    if bill.charges.is_empty() {
        warn!("{provider}: bill has no charge lines, nothing to research");
        let log = ResearchLog::new(config.search_budget);
        return Ok(assemble(bill, Vec::new(), &config.price_thresholds, log));
    }

    info!("Researching prices for {} charge(s) from {provider}", bill.charges.len());
    let agent = ResearchAgent::new(backend, search, config);
    let (research, log): (RateResearch, _) = agent
        .run(
            AnalysisKind::PriceResearch,
            prompts::PRICE_RESEARCH_SYSTEM_PROMPT,
            &price_task(bill),
        )
        .await?;

    let estimates = index_estimates(research.estimates, bill.charges.len());
    Ok(assemble(bill, estimates, &config.price_thresholds, log))
}

/// One slot per charge line; out-of-range and duplicate lines are dropped.
///
/// An estimate without a line number belongs to the charge at its position.
fn index_estimates(estimates: Vec<RateEstimate>, lines: usize) -> Vec<Option<RateEstimate>> {
    let mut slots: Vec<Option<RateEstimate>> = vec![None; lines];
    for (position, estimate) in estimates.into_iter().enumerate() {
        let line = estimate.line.unwrap_or(position);
        match slots.get_mut(line) {
            Some(slot) if slot.is_none() => *slot = Some(estimate),
            Some(_) => warn!("Duplicate estimate for line {line}, keeping the first"),
            None => warn!("Estimate for line {line} but the bill has {lines} line(s)"),
        }
    }
    slots
}

fn assemble(
    bill: &MedicalBill,
    estimates: Vec<Option<RateEstimate>>,
    thresholds: &PriceThresholds,
    research: ResearchLog,
) -> PriceReport {
    let procedures: Vec<ProcedureAssessment> = bill
        .charges
        .iter()
        .zip(estimates.into_iter().chain(std::iter::repeat(None)))
        .map(|(charge, estimate)| assess(charge, estimate.unwrap_or_default(), thresholds))
        .collect();
    let summary = PriceSummary::from_procedures(&procedures);

    PriceReport {
        hospital_name: bill.hospital_name.clone(),
        patient_name: bill.patient_name.clone(),
        procedures,
        summary,
        research,
    }
}

fn assess(charge: &Charge, estimate: RateEstimate, thresholds: &PriceThresholds) -> ProcedureAssessment {
    // Zero or negative benchmarks are lookup noise.
    let medicare_rate = estimate.medicare_rate.filter(|r| *r > 0.0);
    let commercial_average = estimate.commercial_average.filter(|r| *r > 0.0);

    let (verdict, overcharge_amount) = match charge.amount {
        Some(billed) => (
            classify_price(billed, medicare_rate, commercial_average, thresholds),
            overcharge(billed, medicare_rate, commercial_average),
        ),
        None => (PriceVerdict::Fair, None),
    };

    ProcedureAssessment {
        procedure_code: charge.code.clone(),
        procedure_name: charge.label().to_string(),
        billed_amount: charge.amount,
        medicare_rate,
        commercial_average,
        overcharge_amount,
        verdict,
        notes: estimate.notes,
        sources: estimate.sources,
    }
}

/// The bill as the model sees it: provider context plus numbered lines.
fn price_task(bill: &MedicalBill) -> String {
    let mut task = String::from("Research fair prices for this medical bill.\n\n");
    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".into());
    let _ = writeln!(task, "Provider: {}", field(&bill.hospital_name));
    let location = [bill.city.as_deref(), bill.country.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");
    if !location.is_empty() {
        let _ = writeln!(task, "Location: {location}");
    }
    let _ = writeln!(task, "Date of service: {}", field(&bill.date_of_service));
    let _ = writeln!(task, "\nCharge lines:");
    for (i, charge) in bill.charges.iter().enumerate() {
        let code = charge.code.as_deref().unwrap_or("no code");
        let amount = charge
            .amount
            .map(|a| format!("{a:.2}"))
            .unwrap_or_else(|| "amount unreadable".into());
        let _ = writeln!(
            task,
            "{i}: [{code}] {} | billed {amount}",
            charge.description.as_deref().unwrap_or("no description")
        );
    }
    task
}
