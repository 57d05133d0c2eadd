//! Classification: parsed JSON → typed [`Document`] records.
//!
//! The model returns either one object or an array of objects, one per
//! document type it found. Each must carry a known `document_type`; the
//! classifier never guesses a type from the fields present.

use crate::documents::{Document, DocumentKind};
use crate::error::AdvocateError;
use crate::pipeline::unwrap::excerpt;
use serde_json::{Map, Value};
use tracing::debug;

const DISCRIMINATOR: &str = "document_type";
/// Older prompts produced `doc_type`; still accepted.
const DISCRIMINATOR_ALIAS: &str = "doc_type";

/// Turn a parsed model reply into ordered records.
///
/// `excerpt_chars` bounds the raw excerpt attached to shape errors.
pub fn classify(value: Value, excerpt_chars: usize) -> Result<Vec<Document>, AdvocateError> {
    match value {
        Value::Array(items) if items.is_empty() => {
            Err(AdvocateError::UnclassifiableDocument { raw: Value::Array(items) })
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| classify_one(item, excerpt_chars))
            .collect(),
        other => Ok(vec![classify_one(other, excerpt_chars)?]),
    }
}

fn classify_one(value: Value, excerpt_chars: usize) -> Result<Document, AdvocateError> {
    let Value::Object(mut fields) = value else {
        return Err(AdvocateError::UnclassifiableDocument { raw: value });
    };
    normalize_discriminator(&mut fields);

    let kind = fields
        .get(DISCRIMINATOR)
        .and_then(Value::as_str)
        .and_then(DocumentKind::from_discriminator);
    let Some(kind) = kind else {
        return Err(AdvocateError::UnclassifiableDocument {
            raw: Value::Object(fields),
        });
    };

    let raw = Value::Object(fields);
    let raw_text = raw.to_string();
    let document: Document =
        serde_json::from_value(raw).map_err(|e| AdvocateError::MalformedResponse {
            details: format!("{kind} record does not match its schema: {e}"),
            raw_excerpt: excerpt(&raw_text, excerpt_chars),
        })?;
    debug!("Classified record as {kind}");
    Ok(document)
}

/// Move `doc_type` to `document_type` unless the canonical key is present.
fn normalize_discriminator(fields: &mut Map<String, Value>) {
    if fields.contains_key(DISCRIMINATOR) {
        return;
    }
    if let Some(tag) = fields.remove(DISCRIMINATOR_ALIAS) {
        fields.insert(DISCRIMINATOR.to_string(), tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_object() {
        let docs = classify(
            json!({"document_type": "medical_bill", "hospital_name": "MidTown Orthopedics"}),
            500,
        )
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].kind(), DocumentKind::MedicalBill);
    }

    #[test]
    fn array_preserves_order() {
        let docs = classify(
            json!([
                {"document_type": "denial_letter", "denial_reasons": ["not medically necessary"]},
                {"document_type": "medical_bill", "charges": []},
                {"document_type": "insurance_eob"}
            ]),
            500,
        )
        .unwrap();
        let kinds: Vec<_> = docs.iter().map(Document::kind).collect();
        assert_eq!(
            kinds,
            vec![
                DocumentKind::DenialLetter,
                DocumentKind::MedicalBill,
                DocumentKind::InsuranceEob
            ]
        );
    }

    #[test]
    fn doc_type_alias_is_accepted() {
        let docs = classify(json!({"doc_type": "insurance_eob", "claim_number": 42}), 500).unwrap();
        let Document::InsuranceEob(eob) = &docs[0] else {
            panic!("expected an EOB");
        };
        assert_eq!(eob.claim_number.as_deref(), Some("42"));
    }

    #[test]
    fn missing_discriminator_is_unclassifiable() {
        let raw = json!({"hospital_name": "MidTown Orthopedics", "charges": []});
        match classify(raw.clone(), 500).unwrap_err() {
            AdvocateError::UnclassifiableDocument { raw: got } => assert_eq!(got, raw),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_discriminator_is_unclassifiable() {
        let err = classify(json!({"document_type": "pharmacy_receipt"}), 500).unwrap_err();
        assert!(matches!(err, AdvocateError::UnclassifiableDocument { .. }));
    }

    #[test]
    fn one_bad_item_fails_the_array() {
        let err = classify(
            json!([{"document_type": "medical_bill"}, {"something": "else"}]),
            500,
        )
        .unwrap_err();
        assert!(matches!(err, AdvocateError::UnclassifiableDocument { .. }));
    }

    #[test]
    fn empty_array_and_scalars_are_unclassifiable() {
        for raw in [json!([]), json!("medical_bill"), json!(null), json!(42)] {
            let err = classify(raw, 500).unwrap_err();
            assert!(matches!(err, AdvocateError::UnclassifiableDocument { .. }));
        }
    }

    #[test]
    fn known_tag_with_bad_fields_is_malformed() {
        let err = classify(
            json!({"document_type": "medical_bill", "charges": "three lines"}),
            500,
        )
        .unwrap_err();
        match err {
            AdvocateError::MalformedResponse { details, raw_excerpt } => {
                assert!(details.contains("medical_bill"));
                assert!(raw_excerpt.contains("three lines"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
