//! The result of a full advocate run, and its Markdown rendering.
//!
//! Each analysis keeps its own slot. Outputs are never merged, and a failed
//! analysis shows up as an error payload in its slot while the others keep
//! their results.

use crate::analysis::denial::InsuranceAnalysis;
use crate::analysis::price::PriceReport;
use crate::documents::Document;
use crate::error::{AdvocateError, ErrorPayload};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Outcome of one analysis.
///
/// Serialises as `{"status": "completed", "result": {..}}` or
/// `{"status": "failed", "result": {"error": .., ..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Completed(T),
    Failed(ErrorPayload),
}

impl<T> StageOutcome<T> {
    pub fn from_result(result: Result<T, AdvocateError>) -> Self {
        match result {
            Ok(value) => StageOutcome::Completed(value),
            Err(e) => StageOutcome::Failed(e.to_payload()),
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            StageOutcome::Completed(value) => Some(value),
            StageOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}

/// Everything one run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvocateReport {
    pub processed_files: Vec<String>,
    pub documents: Vec<Document>,
    /// One entry per medical bill, in document order.
    #[serde(default)]
    pub price_analyses: Vec<StageOutcome<PriceReport>>,
    /// Present when the documents included denial letters or EOBs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_analysis: Option<StageOutcome<InsuranceAnalysis>>,
}

impl AdvocateReport {
    /// Whether any analysis failed.
    pub fn has_failures(&self) -> bool {
        self.price_analyses.iter().any(StageOutcome::is_failed)
            || self.denial_analysis.as_ref().is_some_and(StageOutcome::is_failed)
    }

    /// Human-readable report, one section per analysis.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Medical Billing Review\n");
        let kinds: Vec<&str> = self.documents.iter().map(|d| d.kind().as_str()).collect();
        let _ = writeln!(
            out,
            "Processed {} file(s): {}  ",
            self.processed_files.len(),
            self.processed_files.join(", ")
        );
        let _ = writeln!(out, "Documents found: {}", kinds.join(", "));

        for outcome in &self.price_analyses {
            let _ = writeln!(out, "\n## Medical Bill Price Analysis\n");
            match outcome {
                StageOutcome::Completed(report) => render_price(&mut out, report),
                StageOutcome::Failed(payload) => render_failure(&mut out, payload),
            }
        }

        if let Some(ref outcome) = self.denial_analysis {
            let _ = writeln!(out, "\n## Insurance Denial & Appeal Analysis\n");
            match outcome {
                StageOutcome::Completed(analysis) => render_denial(&mut out, analysis),
                StageOutcome::Failed(payload) => render_failure(&mut out, payload),
            }
        }
        out
    }
}

fn money(v: Option<f64>) -> String {
    v.map(|a| format!("{a:.2}")).unwrap_or_else(|| "N/A".into())
}

fn cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

fn render_failure(out: &mut String, payload: &ErrorPayload) {
    let _ = writeln!(out, "**Analysis failed:** {}\n", payload.error);
    let _ = writeln!(out, "{}", payload.details);
    if let Some(ref raw) = payload.raw_response {
        let _ = writeln!(out, "\n```text\n{raw}\n```");
    }
}

fn render_price(out: &mut String, report: &PriceReport) {
    if let Some(ref hospital) = report.hospital_name {
        let _ = writeln!(out, "**Provider:** {hospital}  ");
    }
    if let Some(ref patient) = report.patient_name {
        let _ = writeln!(out, "**Patient:** {patient}  ");
    }
    let _ = writeln!(out);

    if report.procedures.is_empty() {
        let _ = writeln!(out, "No charge lines were found on this bill.");
    } else {
        let _ = writeln!(
            out,
            "| Code | Procedure | Billed | Reference rate | Commercial avg | Overcharge | Verdict |"
        );
        let _ = writeln!(out, "|---|---|---:|---:|---:|---:|---|");
        for p in &report.procedures {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                cell(p.procedure_code.as_deref().unwrap_or("N/A")),
                cell(&p.procedure_name),
                money(p.billed_amount),
                money(p.medicare_rate),
                money(p.commercial_average),
                money(p.overcharge_amount),
                p.verdict
            );
        }
    }

    let s = &report.summary;
    let _ = writeln!(out, "\n### Summary\n");
    let _ = writeln!(out, "- Total billed: {:.2}", s.total_billed);
    let _ = writeln!(out, "- Total reference rate: {}", money(s.total_medicare));
    let _ = writeln!(out, "- Total commercial average: {}", money(s.total_commercial));
    let _ = writeln!(out, "- Total overcharge: {}", money(s.total_overcharge));
    let _ = writeln!(out, "- **Overall verdict: {}**", s.overall_verdict);

    let sources: Vec<&String> = report
        .procedures
        .iter()
        .flat_map(|p| p.sources.iter())
        .collect();
    render_sources(out, sources.into_iter().chain(report.research.sources().iter()).cloned().collect());
}

fn render_denial(out: &mut String, analysis: &InsuranceAnalysis) {
    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".into());
    let _ = writeln!(out, "**Insurer:** {}  ", field(&analysis.insurance_company));
    let _ = writeln!(out, "**Policy:** {}  ", field(&analysis.policy_name));
    let _ = writeln!(out, "**Policy number:** {}\n", field(&analysis.policy_number));

    if !analysis.denial_analysis.is_empty() {
        let _ = writeln!(out, "| Denied item | Amount | Reason | Policy terms found | Verdict |");
        let _ = writeln!(out, "|---|---:|---|---|---|");
        for item in &analysis.denial_analysis {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                cell(&item.denied_item),
                money(item.denied_amount),
                cell(item.denial_reason.as_deref().unwrap_or("N/A")),
                cell(item.policy_terms_found.as_deref().unwrap_or("N/A")),
                item.verdict
            );
        }
    }

    let a = &analysis.appeal_strategy;
    let _ = writeln!(out, "\n### Appeal Strategy\n");
    let recommended = match a.is_appeal_recommended {
        Some(true) => "yes",
        Some(false) => "no",
        None => "undetermined",
    };
    let _ = writeln!(out, "- Appeal recommended: {recommended}");
    let _ = writeln!(out, "- Deadline: {}", field(&a.appeal_deadline));
    if let Some(likelihood) = a.success_likelihood {
        let _ = writeln!(out, "- Success likelihood: {likelihood}");
    }
    render_list(out, "Required documents", &a.required_documents, false);
    render_list(out, "Appeal process", &a.appeal_process, true);
    render_list(out, "Key arguments", &a.key_arguments, false);
    render_list(out, "Next steps", &analysis.next_steps, true);

    let mut sources: Vec<String> = analysis
        .denial_analysis
        .iter()
        .flat_map(|i| i.sources.iter().cloned())
        .collect();
    sources.extend(analysis.research.sources());
    render_sources(out, sources);
}

fn render_list(out: &mut String, title: &str, items: &[String], numbered: bool) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n**{title}:**\n");
    for (i, item) in items.iter().enumerate() {
        if numbered {
            let _ = writeln!(out, "{}. {item}", i + 1);
        } else {
            let _ = writeln!(out, "- {item}");
        }
    }
}

fn render_sources(out: &mut String, mut sources: Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    sources.retain(|s| seen.insert(s.clone()));
    if sources.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n**Sources:**\n");
    for url in sources {
        let _ = writeln!(out, "- <{url}>");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ResearchLog;
    use crate::analysis::denial::{AppealStrategy, DenialAnalysisItem, DenialVerdict};
    use crate::analysis::price::{PriceSummary, PriceVerdict, ProcedureAssessment};
    use crate::documents::{DenialLetter, MedicalBill};

    fn price_report() -> PriceReport {
        let procedures = vec![ProcedureAssessment {
            procedure_code: Some("99203".into()),
            procedure_name: "New Patient Office Visit".into(),
            billed_amount: Some(155.0),
            medicare_rate: Some(40.0),
            commercial_average: None,
            overcharge_amount: Some(115.0),
            verdict: PriceVerdict::SignificantlyOverpriced,
            notes: None,
            sources: vec!["https://www.cms.gov/pfs".into()],
        }];
        PriceReport {
            hospital_name: Some("MidTown Orthopedics".into()),
            patient_name: Some("Julie Smith".into()),
            summary: PriceSummary::from_procedures(&procedures),
            procedures,
            research: ResearchLog::new(6),
        }
    }

    fn denial() -> InsuranceAnalysis {
        InsuranceAnalysis {
            insurance_company: Some("HDFC ERGO".into()),
            denial_analysis: vec![DenialAnalysisItem {
                denied_item: "Room Rent | General ward".into(),
                denied_amount: Some(5500.0),
                denial_reason: Some("Exceeds limit".into()),
                policy_terms_found: None,
                verdict: DenialVerdict::Unjustified,
                sources: vec![],
            }],
            appeal_strategy: AppealStrategy {
                is_appeal_recommended: Some(true),
                appeal_process: vec!["Resubmit claim".into()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn report(denial_outcome: StageOutcome<InsuranceAnalysis>) -> AdvocateReport {
        AdvocateReport {
            processed_files: vec!["bill.png".into(), "denial.pdf".into()],
            documents: vec![
                Document::MedicalBill(MedicalBill::default()),
                Document::DenialLetter(DenialLetter::default()),
            ],
            price_analyses: vec![StageOutcome::Completed(price_report())],
            denial_analysis: Some(denial_outcome),
        }
    }

    #[test]
    fn sections_are_separate() {
        let md = report(StageOutcome::Completed(denial())).render_markdown();
        let price_at = md.find("## Medical Bill Price Analysis").unwrap();
        let denial_at = md.find("## Insurance Denial & Appeal Analysis").unwrap();
        assert!(price_at < denial_at);
        assert!(md.contains("| 99203 | New Patient Office Visit | 155.00 | 40.00 | N/A | 115.00 | Significantly overpriced |"));
        assert!(md.contains("Room Rent \\| General ward"));
        assert!(md.contains("1. Resubmit claim"));
        assert!(md.contains("- <https://www.cms.gov/pfs>"));
        assert!(md.contains("Documents found: medical_bill, denial_letter"));
    }

    #[test]
    fn failure_is_isolated_to_its_slot() {
        let failed = StageOutcome::from_result(Err(AdvocateError::ApiTimeout {
            purpose: "denial analysis".into(),
            secs: 120,
        }));
        let r = report(failed);
        assert!(r.has_failures());
        let md = r.render_markdown();
        assert!(md.contains("**Analysis failed:** LLM call timed out"));
        assert!(md.contains("Overall verdict: Significantly overpriced"));
    }

    #[test]
    fn outcome_json_shape() {
        let r = report(StageOutcome::Completed(denial()));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["price_analyses"][0]["status"], "completed");
        assert_eq!(v["price_analyses"][0]["result"]["hospital_name"], "MidTown Orthopedics");
        assert_eq!(v["denial_analysis"]["result"]["denial_analysis"][0]["verdict"], "Unjustified");

        let back: AdvocateReport = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
        assert!(!back.has_failures());
    }
}
