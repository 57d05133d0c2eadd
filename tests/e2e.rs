//! End-to-end tests for medbill-advocate.
//!
//! Most tests drive the full pipeline against a scripted model backend and a
//! counting search provider, so they run offline. `live_review_of_sample`
//! makes real LLM and search calls and is gated behind `E2E_ENABLED`.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture
//!
//! Live run:
//!   E2E_ENABLED=1 MEDBILL_E2E_FILE=./test_cases/bill.png cargo test --test e2e live -- --nocapture

use async_trait::async_trait;
use medbill_advocate::{
    Advocate, AdvocateConfig, AdvocateError, AnalysisKind, DenialVerdict, Document, ErrorKind,
    ModelBackend, ModelReply, ModelRequest, PipelineObserver, PipelineState, PriceVerdict,
    RequestPurpose, SearchHit, SearchProvider, StageOutcome, SuccessLikelihood, Workspace,
};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF";
const PDF_MAGIC: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n";
const PLAIN_TEXT: &[u8] = b"not a document";

/// Replies queued per request purpose; every request is recorded.
#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<HashMap<RequestPurpose, VecDeque<String>>>,
    calls: Mutex<Vec<ModelRequest>>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn reply(self: &Arc<Self>, purpose: RequestPurpose, content: impl Into<String>) -> Arc<Self> {
        self.replies
            .lock()
            .unwrap()
            .entry(purpose)
            .or_default()
            .push_back(content.into());
        Arc::clone(self)
    }

    fn calls_for(&self, purpose: RequestPurpose) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.purpose == purpose)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn attachments_sent(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.attachments.len())
            .sum()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, AdvocateError> {
        self.calls.lock().unwrap().push(request.clone());
        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&request.purpose)
            .and_then(|q| q.pop_front());
        match next {
            Some(content) => Ok(ModelReply {
                content,
                ..ModelReply::default()
            }),
            None => Err(AdvocateError::LlmApiError {
                message: format!("no scripted reply left for {}", request.purpose),
            }),
        }
    }
}

/// Returns one canned hit per query and counts queries.
#[derive(Default)]
struct CountingSearch {
    queries: AtomicUsize,
}

#[async_trait]
impl SearchProvider for CountingSearch {
    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchHit>, AdvocateError> {
        let n = self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SearchHit {
            title: format!("Result for {query}"),
            url: format!("https://example.org/rates/{n}"),
            snippet: "Medicare national payment amount $100.00".into(),
            score: 0.9,
        }])
    }
}

#[derive(Default)]
struct RecordingObserver {
    states: Mutex<Vec<PipelineState>>,
    failures: Mutex<Vec<AnalysisKind>>,
    searches: AtomicUsize,
}

impl PipelineObserver for RecordingObserver {
    fn on_state_change(&self, state: PipelineState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_analysis_complete(&self, kind: AnalysisKind, error: Option<&str>) {
        if error.is_some() {
            self.failures.lock().unwrap().push(kind);
        }
    }

    fn on_search(&self, _kind: AnalysisKind, _query: &str) {
        self.searches.fetch_add(1, Ordering::SeqCst);
    }
}

fn advocate(backend: Arc<ScriptedBackend>, search: Arc<CountingSearch>, config: AdvocateConfig) -> Advocate {
    Advocate::new(backend, search, config)
}

fn test_config() -> AdvocateConfig {
    AdvocateConfig::builder().search_budget(3).build().unwrap()
}

async fn workspace_with(files: &[(&str, &[u8])]) -> Workspace {
    let ws = Workspace::temporary().unwrap();
    for (name, bytes) in files {
        ws.store(name, bytes).await.unwrap();
    }
    ws
}

fn remaining(ws: &Workspace) -> Vec<String> {
    ws.supported_files()
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect()
}

const BILL_JSON: &str = r#"{
  "document_type": "medical_bill",
  "hospital_name": "St. Mary's Regional",
  "city": "Reno",
  "country": "USA",
  "patient_name": "Jordan Lee",
  "charges": [
    {"code": "99215", "description": "Office visit, established patient", "amount": 450.00},
    {"code": "80053", "description": "Comprehensive metabolic panel", "amount": "$50.00"}
  ],
  "total_billed": 500.00
}"#;

const DENIAL_JSON: &str = r#"{
  "document_type": "denial_letter",
  "insurance_company": "HDFC ERGO General Insurance",
  "policy_name": "Optima Secure",
  "policy_number": "2856203456789012000",
  "patient_name": "Jordan Lee",
  "denied_services": ["MRI brain with contrast"],
  "denial_reasons": ["Pre-existing condition within waiting period"],
  "appeal_deadline": "30 days from the date of this letter"
}"#;

const PRICE_FINAL: &str = r#"{"action": "final", "result": {"estimates": [
  {"line": 0, "medicare_rate": 100.0, "commercial_average": 150.0, "notes": "CMS PFS national", "sources": ["https://www.cms.gov/pfs"]},
  {"line": 1, "medicare_rate": 80.0, "commercial_average": 100.0, "sources": []}
]}}"#;

const DENIAL_FINAL: &str = r#"{
  "denial_analysis": [
    {"denied_item": "MRI brain with contrast", "denied_amount": 1200, "denial_reason": "Pre-existing condition", "verdict": "Unjustified", "sources": "https://www.irdai.gov.in/moratorium"}
  ],
  "appeal_strategy": {"success_likelihood": "Medium", "key_arguments": ["Condition was disclosed at enrolment"]},
  "next_steps": ["Write to the grievance cell", "Escalate to the Insurance Ombudsman"]
}"#;

// ── Extraction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_workspace_is_missing_input() {
    let backend = ScriptedBackend::new();
    let ws = workspace_with(&[("notes.txt", PLAIN_TEXT)]).await;
    let adv = advocate(backend.clone(), Arc::default(), test_config());

    let err = adv.run(&ws).await.unwrap_err();
    assert!(matches!(err, AdvocateError::MissingInput { .. }), "{err}");
    assert!(!err.is_fatal());
    assert_eq!(backend.total_calls(), 0, "no model call without input");
}

#[tokio::test]
async fn test_fenced_reply_extracts_like_bare_reply() {
    let fenced = format!("Here is the data:\n```json\n{BILL_JSON}\n```\nLet me know!");
    let mut extracted = Vec::new();
    for reply in [BILL_JSON.to_string(), fenced] {
        let backend = ScriptedBackend::new().reply(RequestPurpose::Extraction, reply);
        let ws = workspace_with(&[("bill.png", PNG_MAGIC)]).await;
        let adv = advocate(backend, Arc::default(), test_config());
        extracted.push(adv.extract(&ws).await.unwrap().documents);
    }
    assert_eq!(extracted[0], extracted[1]);
}

#[tokio::test]
async fn test_three_pages_become_one_bill() {
    let backend = ScriptedBackend::new().reply(RequestPurpose::Extraction, BILL_JSON);
    let ws = workspace_with(&[
        ("page1.png", PNG_MAGIC),
        ("page2.jpg", JPEG_MAGIC),
        ("page3.pdf", PDF_MAGIC),
    ])
    .await;
    let adv = advocate(backend.clone(), Arc::default(), test_config());

    let extraction = adv.extract(&ws).await.unwrap();
    assert_eq!(extraction.documents.len(), 1);
    match &extraction.documents[0] {
        Document::MedicalBill(bill) => {
            assert_eq!(bill.charges.len(), 2);
            assert_eq!(bill.charges[1].amount, Some(50.0));
        }
        other => panic!("expected a medical bill, got {:?}", other.kind()),
    }

    let mut processed = extraction.processed_files.clone();
    processed.sort();
    assert_eq!(processed, vec!["page1.png", "page2.jpg", "page3.pdf"]);
    assert_eq!(backend.calls_for(RequestPurpose::Extraction), 1);
    assert_eq!(backend.attachments_sent(), 3, "all pages in a single request");
    assert!(remaining(&ws).is_empty(), "processed files are deleted");

    let payload = extraction.to_payload();
    assert_eq!(payload["document_type"], "medical_bill");
    assert!(payload["processed_files"].is_array());
}

#[tokio::test]
async fn test_malformed_reply_keeps_files() {
    let backend = ScriptedBackend::new().reply(
        RequestPurpose::Extraction,
        "I'm sorry, the image is too blurry to read.",
    );
    let ws = workspace_with(&[("bill.png", PNG_MAGIC)]).await;
    let adv = advocate(backend, Arc::default(), test_config());

    let err = adv.extract(&ws).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    let payload = err.to_payload();
    assert!(payload.raw_response.unwrap().starts_with("I'm sorry"));
    assert_eq!(remaining(&ws), vec!["bill.png"], "files stay for a retry");
}

#[tokio::test]
async fn test_unknown_document_type_is_unclassifiable() {
    let backend = ScriptedBackend::new().reply(
        RequestPurpose::Extraction,
        r#"{"document_type": "prescription", "drug": "amoxicillin"}"#,
    );
    let ws = workspace_with(&[("rx.png", PNG_MAGIC)]).await;
    let adv = advocate(backend, Arc::default(), test_config());

    let err = adv.extract(&ws).await.unwrap_err();
    let payload = err.to_payload();
    assert_eq!(payload.kind, ErrorKind::UnclassifiableDocument);
    assert_eq!(payload.raw_data.unwrap()["drug"], "amoxicillin");
    assert_eq!(remaining(&ws), vec!["rx.png"]);
}

#[tokio::test]
async fn test_doc_type_alias_is_accepted() {
    let reply = BILL_JSON.replace("\"document_type\"", "\"doc_type\"");
    let backend = ScriptedBackend::new().reply(RequestPurpose::Extraction, reply);
    let ws = workspace_with(&[("bill.png", PNG_MAGIC)]).await;
    let adv = advocate(backend, Arc::default(), test_config());

    let extraction = adv.extract(&ws).await.unwrap();
    assert!(matches!(extraction.documents[0], Document::MedicalBill(_)));
}

// ── Full runs ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_bill_prices_are_graded() {
    let backend = ScriptedBackend::new()
        .reply(RequestPurpose::Extraction, BILL_JSON)
        .reply(RequestPurpose::PriceResearch, r#"{"action": "search", "query": "CPT 99215 Medicare rate"}"#)
        .reply(RequestPurpose::PriceResearch, PRICE_FINAL);
    let search = Arc::new(CountingSearch::default());
    let ws = workspace_with(&[("bill.png", PNG_MAGIC)]).await;
    let adv = advocate(backend.clone(), search.clone(), test_config());

    let report = adv.run(&ws).await.unwrap();
    assert!(report.denial_analysis.is_none());
    assert_eq!(report.price_analyses.len(), 1);

    let prices = report.price_analyses[0].completed().expect("price analysis");
    let verdicts: Vec<PriceVerdict> = prices.procedures.iter().map(|p| p.verdict).collect();
    // 450 > 3 × 100; 50 is below both benchmarks.
    assert_eq!(
        verdicts,
        vec![PriceVerdict::SignificantlyOverpriced, PriceVerdict::GoodPrice]
    );
    assert_eq!(prices.summary.total_billed, 500.0);
    assert_eq!(prices.summary.overall_verdict, PriceVerdict::SignificantlyOverpriced);
    assert_eq!(prices.research.searches_used(), 1);
    assert_eq!(search.queries.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls_for(RequestPurpose::PriceResearch), 2);

    let md = report.render_markdown();
    assert!(md.contains("## Medical Bill Price Analysis"));
    assert!(md.contains("Significantly overpriced"));
}

#[tokio::test]
async fn test_bill_and_denial_each_analyzed_once() {
    let extraction = format!("[{BILL_JSON}, {DENIAL_JSON}]");
    let backend = ScriptedBackend::new()
        .reply(RequestPurpose::Extraction, extraction)
        .reply(RequestPurpose::PriceResearch, PRICE_FINAL)
        .reply(RequestPurpose::DenialAnalysis, r#"{"action": "search", "query": "HDFC ERGO pre-existing waiting period"}"#)
        .reply(RequestPurpose::DenialAnalysis, DENIAL_FINAL);
    let ws = workspace_with(&[("bill.png", PNG_MAGIC), ("denial.pdf", PDF_MAGIC)]).await;
    let adv = advocate(backend.clone(), Arc::default(), test_config());

    let report = adv.run(&ws).await.unwrap();
    assert_eq!(report.documents.len(), 2);
    assert_eq!(report.price_analyses.len(), 1);
    assert!(!report.has_failures());
    assert_eq!(backend.calls_for(RequestPurpose::Extraction), 1);
    assert_eq!(backend.calls_for(RequestPurpose::PriceResearch), 1);
    assert_eq!(backend.calls_for(RequestPurpose::DenialAnalysis), 2);

    let denial = report
        .denial_analysis
        .as_ref()
        .and_then(StageOutcome::completed)
        .expect("denial analysis");
    assert_eq!(denial.denial_analysis[0].verdict, DenialVerdict::Unjustified);
    assert_eq!(denial.denial_analysis[0].denied_amount, Some(1200.0));
    assert_eq!(denial.appeal_strategy.success_likelihood, Some(SuccessLikelihood::Medium));
    // Filled from the letter when the model leaves them out.
    assert_eq!(denial.insurance_company.as_deref(), Some("HDFC ERGO General Insurance"));
    assert_eq!(denial.policy_name.as_deref(), Some("Optima Secure"));
    assert_eq!(denial.appeal_strategy.is_appeal_recommended, Some(true));

    let md = report.render_markdown();
    let price_at = md.find("## Medical Bill Price Analysis").unwrap();
    let denial_at = md.find("## Insurance Denial & Appeal Analysis").unwrap();
    assert!(price_at < denial_at, "sections are kept separate and ordered");
}

#[tokio::test]
async fn test_failed_analysis_is_isolated() {
    let extraction = format!("[{BILL_JSON}, {DENIAL_JSON}]");
    let backend = ScriptedBackend::new()
        .reply(RequestPurpose::Extraction, extraction)
        .reply(RequestPurpose::PriceResearch, "<html>502 Bad Gateway</html>")
        .reply(RequestPurpose::DenialAnalysis, DENIAL_FINAL);
    let observer = Arc::new(RecordingObserver::default());
    let config = AdvocateConfig::builder()
        .observer(observer.clone())
        .build()
        .unwrap();
    let ws = workspace_with(&[("bill.png", PNG_MAGIC), ("denial.png", PNG_MAGIC)]).await;
    let adv = advocate(backend, Arc::default(), config);

    let report = adv.run(&ws).await.unwrap();
    assert!(report.has_failures());
    match &report.price_analyses[0] {
        StageOutcome::Failed(payload) => assert_eq!(payload.kind, ErrorKind::MalformedResponse),
        StageOutcome::Completed(_) => panic!("price research should have failed"),
    }
    assert!(report.denial_analysis.as_ref().unwrap().completed().is_some());
    assert_eq!(*observer.failures.lock().unwrap(), vec![AnalysisKind::PriceResearch]);
    assert!(report.render_markdown().contains("**Analysis failed:**"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["price_analyses"][0]["status"], "failed");
    assert_eq!(json["denial_analysis"]["status"], "completed");
}

#[tokio::test]
async fn test_search_budget_is_enforced() {
    let search_step = r#"{"action": "search", "query": "CPT 99215 price"}"#;
    let backend = ScriptedBackend::new()
        .reply(RequestPurpose::Extraction, BILL_JSON)
        .reply(RequestPurpose::PriceResearch, search_step)
        .reply(RequestPurpose::PriceResearch, search_step)
        .reply(RequestPurpose::PriceResearch, search_step);
    let search = Arc::new(CountingSearch::default());
    let config = AdvocateConfig::builder().search_budget(2).build().unwrap();
    let ws = workspace_with(&[("bill.png", PNG_MAGIC)]).await;
    let adv = advocate(backend.clone(), search.clone(), config);

    let report = adv.run(&ws).await.unwrap();
    assert_eq!(search.queries.load(Ordering::SeqCst), 2);
    assert_eq!(backend.calls_for(RequestPurpose::PriceResearch), 3, "budget + 1 calls at most");
    match &report.price_analyses[0] {
        StageOutcome::Failed(payload) => {
            assert_eq!(payload.error, "Research did not finish");
            assert!(payload.details.contains("2 searches"), "{}", payload.details);
        }
        StageOutcome::Completed(_) => panic!("an endless search loop must not complete"),
    }
}

#[tokio::test]
async fn test_observer_sees_every_state() {
    let backend = ScriptedBackend::new()
        .reply(RequestPurpose::Extraction, DENIAL_JSON)
        .reply(RequestPurpose::DenialAnalysis, r#"{"action": "search", "query": "IRDAI moratorium"}"#)
        .reply(RequestPurpose::DenialAnalysis, DENIAL_FINAL);
    let observer = Arc::new(RecordingObserver::default());
    let config = AdvocateConfig::builder()
        .observer(observer.clone())
        .build()
        .unwrap();
    let ws = workspace_with(&[("denial.png", PNG_MAGIC)]).await;
    let adv = advocate(backend, Arc::default(), config);

    let report = adv.run(&ws).await.unwrap();
    assert!(report.price_analyses.is_empty());
    assert_eq!(
        *observer.states.lock().unwrap(),
        vec![
            PipelineState::AwaitingInput,
            PipelineState::Extracted,
            PipelineState::Analyzing,
            PipelineState::Complete
        ]
    );
    assert_eq!(observer.searches.load(Ordering::SeqCst), 1);
    assert!(observer.failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_appeal_recommendation_always_set() {
    let backend = ScriptedBackend::new()
        .reply(RequestPurpose::Extraction, DENIAL_JSON)
        .reply(RequestPurpose::DenialAnalysis, r#"{"denial_analysis": [], "next_steps": ["Call the insurer"]}"#);
    let ws = workspace_with(&[("denial.png", PNG_MAGIC)]).await;
    let adv = advocate(backend, Arc::default(), test_config());

    let report = adv.run(&ws).await.unwrap();
    let denial = report
        .denial_analysis
        .as_ref()
        .and_then(StageOutcome::completed)
        .expect("denial analysis");
    assert_eq!(denial.appeal_strategy.is_appeal_recommended, Some(true));
    assert!(!report.render_markdown().contains("undetermined"));
}

#[tokio::test]
async fn test_cut_off_fence_still_extracts() {
    let reply = format!("```json\n{BILL_JSON}\n");
    let backend = ScriptedBackend::new().reply(RequestPurpose::Extraction, reply);
    let ws = workspace_with(&[("bill.png", PNG_MAGIC)]).await;
    let adv = advocate(backend, Arc::default(), test_config());

    let extraction = adv.extract(&ws).await.unwrap();
    assert!(matches!(extraction.documents[0], Document::MedicalBill(_)));
}

#[test]
fn test_run_sync_outside_runtime() {
    let backend = ScriptedBackend::new();
    let ws = Workspace::temporary().unwrap();
    let adv = advocate(backend, Arc::default(), test_config());
    let err = adv.run_sync(&ws).unwrap_err();
    assert!(matches!(err, AdvocateError::MissingInput { .. }));
}

// ── Live ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_review_of_sample() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run live tests");
        return;
    }
    let Some(path) = std::env::var_os("MEDBILL_E2E_FILE").map(PathBuf::from) else {
        println!("SKIP: set MEDBILL_E2E_FILE to a bill, EOB or denial letter");
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("medbill_advocate=debug"))
        .with_test_writer()
        .try_init();

    let adv = Advocate::from_config(AdvocateConfig::default()).expect("provider configured");
    let ws = Workspace::temporary().unwrap();
    ws.store_from_path(&path).await.unwrap();

    let report = adv.run(&ws).await.expect("live run");
    println!("{}", report.render_markdown());
    assert!(!report.documents.is_empty());
    assert!(remaining(&ws).is_empty());
}
