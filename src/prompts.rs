//! Prompt text for extraction and both analyses.
//!
//! Every instruction the model sees is built here, so unit tests can check
//! prompt content without a model. The record schemas are generated from the
//! Rust types in [`crate::documents`] and never maintained by hand.

use crate::documents::{DenialLetter, DocumentKind, InsuranceEob, MedicalBill};
use schemars::{schema_for, JsonSchema};

/// System prompt for the extraction call.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a meticulous medical billing clerk. \
You transcribe medical bills, insurance explanations of benefits and claim denial letters \
into structured JSON exactly as printed. You never invent values.";

/// Build the extraction prompt for `file_count` attached documents.
pub fn extraction_prompt(file_count: usize) -> String {
    format!(
        r#"You are analyzing {file_count} medical document file(s).

TASK: Extract structured data from EACH distinct document type you find.

DOCUMENT TYPES:
1. Medical Bill ("{bill}") - hospital or provider billing statement
2. Insurance EOB ("{eob}") - Explanation of Benefits from an insurance company
3. Denial Letter ("{denial}") - insurance claim denial notice

INSTRUCTIONS:
1. Examine all {file_count} files carefully. Pages of one document may be split across files.
2. Identify EACH distinct document type present.
3. Extract complete data for EACH document using the matching schema below.

SCHEMAS:

Medical Bill Schema:
{bill_schema}

Insurance EOB Schema:
{eob_schema}

Denial Letter Schema:
{denial_schema}

OUTPUT FORMAT:

Every record MUST include a "document_type" field set to "{bill}", "{eob}" or "{denial}".

If you find MULTIPLE document types (e.g. a bill AND a denial letter), return a JSON array:
[
  {{"document_type": "{bill}", "hospital_name": "...", ...}},
  {{"document_type": "{denial}", "insurance_company": "...", ...}}
]

If you find only ONE document type (even across several pages), return a single JSON object:
{{"document_type": "{bill}", "hospital_name": "...", ...}}

CRITICAL RULES:
- Use EXACT field names from the schemas
- Dates: "YYYY-MM-DD"
- Amounts: numbers only, no currency symbols or thousands separators
- Extract ALL charges and services, not just the first few
- If a field is missing or unreadable: use null
- NO markdown formatting, NO code blocks, NO explanations
- Return ONLY valid JSON

Start your response with either [ or {{ and nothing else."#,
        bill = DocumentKind::MedicalBill,
        eob = DocumentKind::InsuranceEob,
        denial = DocumentKind::DenialLetter,
        bill_schema = schema_json::<MedicalBill>(),
        eob_schema = schema_json::<InsuranceEob>(),
        denial_schema = schema_json::<DenialLetter>(),
    )
}

fn schema_json<T: JsonSchema>() -> String {
    serde_json::to_string_pretty(&schema_for!(T)).unwrap_or_else(|_| "{}".to_string())
}

// ── Research loop ────────────────────────────────────────────────────────

/// Appended to every analysis system prompt: how to ask for a search and how
/// to finish.
pub const RESEARCH_PROTOCOL: &str = r#"
RESPONSE PROTOCOL:
You work in turns. Each turn, reply with exactly ONE JSON object and nothing else.

To run a web search:
{"action": "search", "query": "<search terms>"}

When you have enough evidence, or when told that no searches remain:
{"action": "final", "result": { ... the OUTPUT FORMAT object ... }}

Search results from earlier turns appear under RESEARCH LOG. Do not repeat a
query that is already in the log. No markdown, no code fences, no commentary."#;

/// System prompt for price research.
pub const PRICE_RESEARCH_SYSTEM_PROMPT: &str = r#"You are a medical billing advocate researching fair prices.

Given the charges on a medical bill (procedure codes or descriptions with billed amounts), you:
1. Research current fair market prices with web searches
2. Find the government reference rate (e.g. Medicare) where one exists
3. Find the typical commercial insurance rate
4. Cite the source URL for every number

SEARCH STRATEGIES:
- With a CPT code: "CPT code <code> average cost <year>", "Medicare reimbursement <code>"
- With only a description: "<procedure> typical cost", "<procedure> fair price healthcare bluebook"
- Add the provider's city or country when known
- Prefer official sources: CMS fee schedules, FAIR Health, hospital price transparency data
- Use the currency of the bill; if the bill is outside the US, use the local government scheme as the reference rate

OUTPUT FORMAT (the "result" object):
{
  "estimates": [
    {
      "line": <index of the charge, starting at 0>,
      "medicare_rate": <number or null>,
      "commercial_average": <number or null>,
      "notes": "<one sentence on what you found>",
      "sources": ["<url>", ...]
    }
  ]
}

Return one estimate per charge line. Use null for any rate you could not find; never guess.
Do not judge whether the price is fair; that is computed from your numbers."#;

/// System prompt for denial analysis.
pub const DENIAL_ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a medical insurance advocate helping a patient challenge a claim denial.

Given insurance denial letters and/or explanations of benefits, you:
1. Research the insurer's actual policy terms with web searches
2. Compare each denial reason against what the policy says
3. Decide whether each denial is justified or appealable
4. Build an evidence-based appeal strategy, citing sources

SEARCH STRATEGIES:
- Always include the insurance company AND policy name
- "<insurer> <policy> <coverage area>", e.g. "HDFC ERGO Health Suraksha Silver Plan room rent limit"
- Search each denied item separately
- "<insurer> claim appeal process", "<insurer> grievance redressal"
- Look for official policy PDFs and regulator guidelines

VERDICTS (one per denied item):
- "Justified" when the policy supports the denial
- "Unjustified" when the policy covers the item
- "Needs clarification" when it is unclear; an appeal is recommended

OUTPUT FORMAT (the "result" object):
{
  "insurance_company": "<name>",
  "policy_name": "<policy or null>",
  "policy_number": "<number or null>",
  "denial_analysis": [
    {
      "denied_item": "<service or item>",
      "denied_amount": <number or null>,
      "denial_reason": "<reason given>",
      "policy_terms_found": "<what the policy says, from your searches>",
      "verdict": "Justified | Unjustified | Needs clarification",
      "sources": ["<url>", ...]
    }
  ],
  "appeal_strategy": {
    "is_appeal_recommended": true,
    "appeal_deadline": "<YYYY-MM-DD or null>",
    "required_documents": ["..."],
    "appeal_process": ["<step>", ...],
    "success_likelihood": "High | Medium | Low",
    "key_arguments": ["..."]
  },
  "next_steps": ["<actionable step>", ...]
}"#;

/// Render the per-turn user prompt: the task, the research log and the
/// remaining search allowance.
pub fn research_turn(task: &str, log: &str, searches_left: usize) -> String {
    let allowance = if searches_left == 0 {
        "No searches remain. Reply with {\"action\": \"final\", ...} now.".to_string()
    } else {
        format!("Searches remaining: {searches_left}.")
    };
    let log = if log.is_empty() {
        "(no searches yet)"
    } else {
        log
    };
    format!("{task}\n\nRESEARCH LOG:\n{log}\n\n{allowance}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_embeds_schemas_and_tags() {
        let p = extraction_prompt(3);
        assert!(p.contains("analyzing 3 medical document file(s)"));
        assert!(p.contains("\"document_type\": \"medical_bill\""));
        assert!(p.contains("insurance_eob"));
        assert!(p.contains("denial_letter"));
        assert!(p.contains("total_patient_responsibility"));
        assert!(p.contains("appeal_instructions"));
        assert!(p.contains("Amount billed for this service"));
        assert!(p.starts_with("You are analyzing"));
    }

    #[test]
    fn protocol_names_both_actions() {
        assert!(RESEARCH_PROTOCOL.contains("\"action\": \"search\""));
        assert!(RESEARCH_PROTOCOL.contains("\"action\": \"final\""));
    }

    #[test]
    fn research_turn_announces_exhausted_budget() {
        let turn = research_turn("Bill: ...", "", 0);
        assert!(turn.contains("No searches remain"));
        assert!(turn.contains("(no searches yet)"));

        let turn = research_turn("Bill: ...", "1. query", 4);
        assert!(turn.contains("Searches remaining: 4."));
        assert!(turn.contains("1. query"));
    }

    #[test]
    fn analysis_prompts_list_verdicts() {
        assert!(DENIAL_ANALYSIS_SYSTEM_PROMPT.contains("Needs clarification"));
        assert!(PRICE_RESEARCH_SYSTEM_PROMPT.contains("commercial_average"));
        assert!(PRICE_RESEARCH_SYSTEM_PROMPT.contains("medicare_rate"));
    }
}
