use serde::{Deserialize, Serialize}; // For ids & pagination metadata
use serde_json::{Map, Value}; // To represent arbitrary document fields
use std::collections::HashMap;
use thiserror::Error; // For domain-specific errors

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Field '{0}' is reserved and cannot be written")]
    ReservedField(String),
    #[error("Missing required field '{0}'")]
    MissingField(String),
}

/// Field name -> value pairs of a schema-less document.
pub type Fields = HashMap<String, Value>;

/// Well-known field names shared by the collections this service manages.
pub mod field {
    /// Identifier injected into every document returned to a caller.
    pub const DOCUMENT_ID: &str = "documentId";
    pub const FILE_NAME: &str = "fileName";
    pub const AUTHOR_NAME: &str = "authorName";
    pub const DESCRIPTION: &str = "description";
    pub const CATEGORY: &str = "category";
    /// Large body payload produced by the conversion API.
    pub const CONTENT: &str = "content";
    pub const IS_PUBLIC: &str = "isPublic";
    pub const UPLOADER_UID: &str = "uploaderUid";
    pub const UPLOADER_EMAIL: &str = "uploaderEmail";
    pub const UPLOAD_DATE: &str = "uploadDate";
    pub const ORIGINAL_TEXT: &str = "originalText";
    pub const TRANSLATED_TEXT: &str = "translatedText";
    pub const TIMESTAMP: &str = "timestamp";
}

// --- Document ID ---
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: String) -> Self {
        Self(id)
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}
impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id.to_string())
    }
}
impl From<DocumentId> for String {
    fn from(doc_id: DocumentId) -> Self {
        doc_id.0
    }
}
impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Document ---

/// A store-identified document with arbitrary fields. There is no schema:
/// fields come and go per document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    /// Document data stored as field name -> JSON Value pairs.
    fields: Fields,
}

impl Document {
    pub fn new(id: DocumentId, fields: Fields) -> Self {
        Self { id, fields }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Gets a specific field's value.
    pub fn get_field_value(&self, field_name: &str) -> Option<&Value> {
        self.fields.get(field_name)
    }

    /// Returns the field as a string slice, if it holds a string.
    pub fn text(&self, field_name: &str) -> Option<&str> {
        self.fields.get(field_name).and_then(Value::as_str)
    }

    /// Returns the field as a bool, falling back to `default` when the field
    /// is absent or holds another type.
    pub fn flag_or(&self, field_name: &str, default: bool) -> bool {
        self.fields
            .get(field_name)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Merges `updates` into the document. Fields not present in `updates`
    /// are left untouched.
    pub fn merge(&mut self, updates: Fields) -> Result<(), DomainError> {
        ensure_writable(&updates)?;
        self.fields.extend(updates);
        Ok(())
    }

    /// Drops the large `content` payload.
    pub fn without_content(mut self) -> Self {
        self.fields.remove(field::CONTENT);
        self
    }

    /// Flattens the document into the response shape: its fields plus the
    /// identifier under `documentId`.
    pub fn into_response(self) -> Map<String, Value> {
        let mut map: Map<String, Value> = self.fields.into_iter().collect();
        map.insert(field::DOCUMENT_ID.to_string(), Value::String(self.id.into()));
        map
    }
}

/// Rejects writes to fields the store owns.
pub fn ensure_writable(fields: &Fields) -> Result<(), DomainError> {
    if fields.contains_key(field::DOCUMENT_ID) {
        return Err(DomainError::ReservedField(field::DOCUMENT_ID.to_string()));
    }
    Ok(())
}

// --- Pagination ---

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// A 1-based page index and a page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    size: u32,
}

impl PageRequest {
    /// Builds a request without validation. Callers are expected to have
    /// clamped the values already (see [`PageRequest::clamped`]).
    pub fn new(page: u32, size: u32) -> Self {
        Self { page, size }
    }

    /// Lenient construction from raw caller input: a page below 1 becomes 1,
    /// a size outside `[1, MAX_PAGE_SIZE]` becomes `default_size`.
    pub fn clamped(page: Option<i64>, size: Option<i64>, default_size: u32) -> Self {
        let page = match page {
            Some(p) if p >= 1 => u32::try_from(p).unwrap_or(u32::MAX),
            _ => 1,
        };
        let size = match size {
            Some(s) if (1..=MAX_PAGE_SIZE as i64).contains(&s) => s as u32,
            _ => default_size,
        };
        Self { page, size }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of elements preceding this page.
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.size as usize)
    }

    pub fn limit(&self) -> usize {
        self.size as usize
    }
}

/// Pagination metadata. `total_elements` always counts the set before it was
/// sliced into pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationMeta {
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
}

impl PaginationMeta {
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total_elements.div_ceil(self.size as u64)
        }
    }
}

/// A bounded slice of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PaginationMeta,
}

impl<T> Page<T> {
    /// Wraps an already-windowed set of items.
    pub fn new(items: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        Self {
            items,
            meta: PaginationMeta {
                page: request.page(),
                size: request.size(),
                total_elements,
            },
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}

// --- Access & Search Predicates ---

/// Fields consulted by free-text search, in match order.
pub const SEARCHABLE_FIELDS: [&str; 5] = [
    field::FILE_NAME,
    field::AUTHOR_NAME,
    field::DESCRIPTION,
    field::CATEGORY,
    field::CONTENT,
];

/// Case-insensitive substring match over [`SEARCHABLE_FIELDS`].
/// `query_lower` must already be lowercased. An empty or whitespace-only
/// query matches every document.
pub fn matches_query(document: &Document, query_lower: &str) -> bool {
    if query_lower.trim().is_empty() {
        return true;
    }
    SEARCHABLE_FIELDS.iter().any(|name| {
        match document.get_field_value(name) {
            // Author lists are matched element-wise
            Some(Value::Array(items)) if *name == field::AUTHOR_NAME => items
                .iter()
                .any(|item| contains_lowercase(item, query_lower)),
            Some(value) if *name == field::AUTHOR_NAME => {
                value.is_string() && contains_lowercase(value, query_lower)
            }
            Some(value) => contains_lowercase(value, query_lower),
            None => false,
        }
    })
}

fn contains_lowercase(value: &Value, query_lower: &str) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => s.to_lowercase().contains(query_lower),
        other => other.to_string().to_lowercase().contains(query_lower),
    }
}

/// A document is accessible when it is public, or when a non-empty caller id
/// equals its uploader. Anonymous callers pass an empty id.
pub fn is_accessible(document: &Document, caller_id: &str) -> bool {
    if document.flag_or(field::IS_PUBLIC, false) {
        return true;
    }
    !caller_id.is_empty() && document.text(field::UPLOADER_UID) == Some(caller_id)
}

// --- Translation Records ---

/// A cached translation, unique per exact original text.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRecord {
    pub original_text: String,
    pub translated_text: String,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

impl TranslationRecord {
    pub fn to_fields(&self) -> Fields {
        HashMap::from([
            (
                field::ORIGINAL_TEXT.to_string(),
                Value::String(self.original_text.clone()),
            ),
            (
                field::TRANSLATED_TEXT.to_string(),
                Value::String(self.translated_text.clone()),
            ),
            (field::TIMESTAMP.to_string(), Value::from(self.timestamp)),
        ])
    }

    pub fn from_document(document: &Document) -> Result<Self, DomainError> {
        let original_text = document
            .text(field::ORIGINAL_TEXT)
            .ok_or_else(|| DomainError::MissingField(field::ORIGINAL_TEXT.to_string()))?;
        let translated_text = document
            .text(field::TRANSLATED_TEXT)
            .ok_or_else(|| DomainError::MissingField(field::TRANSLATED_TEXT.to_string()))?;
        Ok(Self {
            original_text: original_text.to_string(),
            translated_text: translated_text.to_string(),
            timestamp: document
                .get_field_value(field::TIMESTAMP)
                .and_then(Value::as_i64)
                .unwrap_or_default(),
        })
    }
}

/// Unwraps a raw model reply into plain translated text.
///
/// One pass strips a `"<language>: "` prefix, extracts the value of a
/// single-field `{"text": ...}` JSON object, or else strips leading and
/// trailing double quotes, then trims. Passes repeat until the text stops
/// changing, so `normalize_translation(normalize_translation(x)) ==
/// normalize_translation(x)`.
pub fn normalize_translation(raw: &str, language: &str) -> String {
    let prefix = format!("{language}: ");
    let mut current = raw.trim().to_string();
    loop {
        let next = cleanup_pass(&current, &prefix, !language.is_empty());
        if next == current {
            return current;
        }
        current = next;
    }
}

fn cleanup_pass(text: &str, prefix: &str, strip_prefix: bool) -> String {
    let mut text = text.trim();
    if strip_prefix {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
        }
    }
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text) {
        if object.len() == 1 {
            if let Some(Value::String(inner)) = object.get("text") {
                return inner.trim().to_string();
            }
        }
    }
    text.trim_matches('"').trim().to_string()
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json; // For creating test Values

    fn doc(id: &str, fields: Value) -> Document {
        let fields: Fields = serde_json::from_value(fields).expect("test fields must be an object");
        Document::new(DocumentId::from(id), fields)
    }

    #[test]
    fn page_request_clamps_out_of_range_input() {
        let req = PageRequest::clamped(Some(0), Some(500), DEFAULT_PAGE_SIZE);
        assert_eq!(req.page(), 1);
        assert_eq!(req.size(), DEFAULT_PAGE_SIZE);

        let req = PageRequest::clamped(Some(-3), Some(0), 50);
        assert_eq!((req.page(), req.size()), (1, 50));

        let req = PageRequest::clamped(None, None, DEFAULT_PAGE_SIZE);
        assert_eq!((req.page(), req.size()), (1, 10));

        let req = PageRequest::clamped(Some(4), Some(100), DEFAULT_PAGE_SIZE);
        assert_eq!((req.page(), req.size(), req.offset()), (4, 100, 300));
    }

    #[test]
    fn total_pages_rounds_up() {
        let p = Page::new(vec![21, 22, 23, 24, 25], PageRequest::new(3, 10), 25);
        assert_eq!(p.meta.total_pages(), 3);
        assert_eq!(p.meta.page, 3);
    }

    #[test]
    fn total_pages_of_empty_set_is_zero() {
        let p: Page<u8> = Page::new(Vec::new(), PageRequest::new(1, 10), 0);
        assert_eq!(p.meta.total_pages(), 0);
    }

    #[test]
    fn private_document_visible_only_to_owner() {
        let d = doc("d1", json!({"isPublic": false, "uploaderUid": "u1"}));
        assert!(is_accessible(&d, "u1"));
        assert!(!is_accessible(&d, "u2"));
        assert!(!is_accessible(&d, ""));
    }

    #[test]
    fn public_document_visible_to_everyone() {
        let d = doc("d1", json!({"isPublic": true, "uploaderUid": "u1"}));
        for caller in ["", "u1", "someone-else"] {
            assert!(is_accessible(&d, caller));
        }
    }

    #[test]
    fn missing_or_malformed_flag_is_private() {
        let d = doc("d1", json!({"isPublic": "yes"}));
        assert!(!is_accessible(&d, ""));
        assert!(!is_accessible(&d, "u1"));
    }

    #[test]
    fn query_matches_fields_case_insensitively() {
        let d = doc(
            "d1",
            json!({
                "fileName": "Balochi Grammar",
                "authorName": ["Gul Khan", "Sayad Hashumi"],
                "description": "An introduction",
                "category": "Linguistics",
            }),
        );
        assert!(matches_query(&d, "grammar"));
        assert!(matches_query(&d, "hashumi"));
        assert!(matches_query(&d, "introduction"));
        assert!(matches_query(&d, "lingu"));
        assert!(!matches_query(&d, "poetry"));
    }

    #[test]
    fn query_matches_content_and_string_author() {
        let d = doc("d1", json!({"authorName": "Mir Gul", "content": "Long body TEXT"}));
        assert!(matches_query(&d, "mir"));
        assert!(matches_query(&d, "body text"));
    }

    #[test]
    fn blank_query_matches_everything() {
        let d = doc("d1", json!({}));
        assert!(matches_query(&d, ""));
        assert!(matches_query(&d, "   "));
    }

    #[test]
    fn merge_leaves_other_fields_untouched() {
        let mut d = doc("d1", json!({"fileName": "a", "category": "x"}));
        let updates: Fields = HashMap::from([("category".to_string(), json!("y"))]);
        d.merge(updates).unwrap();
        assert_eq!(d.text("fileName"), Some("a"));
        assert_eq!(d.text("category"), Some("y"));
    }

    #[test]
    fn merge_rejects_identifier_change() {
        let mut d = doc("d1", json!({}));
        let updates: Fields = HashMap::from([("documentId".to_string(), json!("d2"))]);
        assert_eq!(
            d.merge(updates),
            Err(DomainError::ReservedField("documentId".to_string()))
        );
    }

    #[test]
    fn response_contains_id_and_no_content_when_stripped() {
        let d = doc("abc", json!({"fileName": "f", "content": "big"}));
        let map = d.without_content().into_response();
        assert_eq!(map.get("documentId"), Some(&json!("abc")));
        assert!(!map.contains_key("content"));
    }

    #[test]
    fn translation_record_round_trips_through_fields() {
        let record = TranslationRecord {
            original_text: "Hello".to_string(),
            translated_text: "Salaam".to_string(),
            timestamp: 1_700_000_000_000,
        };
        let d = Document::new(DocumentId::from("t1"), record.to_fields());
        assert_eq!(TranslationRecord::from_document(&d).unwrap(), record);
    }

    #[test]
    fn normalize_strips_prefix_json_and_quotes() {
        assert_eq!(normalize_translation("Balochi: Salaam", "Balochi"), "Salaam");
        assert_eq!(normalize_translation(r#"{"text":"Salaam"}"#, "Balochi"), "Salaam");
        assert_eq!(normalize_translation(r#"""Salaam"""#, "Balochi"), "Salaam");
        assert_eq!(
            normalize_translation(r#"  Balochi: {"text":"\"Salaam\""}  "#, "Balochi"),
            "Salaam"
        );
        assert_eq!(normalize_translation("plain text", "Balochi"), "plain text");
    }

    #[test]
    fn normalize_keeps_json_with_other_fields() {
        let raw = r#"{"text":"a","lang":"bal"}"#;
        assert_eq!(normalize_translation(raw, "Balochi"), raw);
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "",
            "   ",
            "Salaam",
            "Balochi: Balochi: Salaam",
            r#""Balochi: Salaam""#,
            r#"{"text":"{\"text\":\"x\"}"}"#,
            r#"""  "#,
            r#"{"text":"Balochi: \"q\""}"#,
            "\"unbalanced",
        ];
        for raw in inputs {
            let once = normalize_translation(raw, "Balochi");
            assert_eq!(normalize_translation(&once, "Balochi"), once, "input: {raw:?}");
        }
    }
}
