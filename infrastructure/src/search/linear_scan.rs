use application::{
    Access, ApplicationError, DocumentStore, SearchCriteria, SearchIndex, SearchResult, SortBy,
    SortOrder,
};
use async_trait::async_trait;
use domain::{Document, Fields, is_accessible, matches_query};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Search backend that reads the whole collection from the store and
/// evaluates every predicate in process.
/// WARNING: Cost grows linearly with collection size.
#[derive(Clone)]
pub struct LinearScanIndex {
    store: Arc<dyn DocumentStore>,
}

impl LinearScanIndex {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchIndex for LinearScanIndex {
    #[instrument(skip(self, criteria))]
    async fn search(
        &self,
        collection_name: &str,
        criteria: &SearchCriteria,
        offset: usize,
        limit: usize,
    ) -> Result<SearchResult, ApplicationError> {
        debug!(collection = %collection_name, query = %criteria.query, filter_count = criteria.filters.len(), sort_count = criteria.sort.len(), offset, limit, "Scanning collection");

        let query_lower = criteria.query.to_lowercase();
        let documents = self.store.get_all(collection_name).await?;
        let scanned = documents.len();

        // --- Step 1: Visibility, query and filters ---
        let mut matched: Vec<Document> = documents
            .into_iter()
            .filter(|doc| passes_access(doc, &criteria.access))
            .filter(|doc| matches_query(doc, &query_lower))
            .filter(|doc| check_doc_matches_filters(doc, &criteria.filters))
            .collect();
        trace!(count = matched.len(), "Documents after matching");

        // --- Step 2: Sorting ---
        sort_documents(&mut matched, &criteria.sort);

        // --- Step 3: Total before pagination ---
        let total_hits = matched.len();

        // --- Step 4: Pagination ---
        let documents: Vec<Document> = matched.into_iter().skip(offset).take(limit).collect();

        debug!(
            collection = %collection_name,
            scanned,
            total_hits,
            returned_hits = documents.len(),
            "Linear scan finished."
        );

        Ok(SearchResult {
            documents,
            total_hits,
        })
    }
}

fn passes_access(doc: &Document, access: &Access) -> bool {
    match access {
        Access::Unrestricted => true,
        Access::VisibleTo(caller_id) => is_accessible(doc, caller_id),
    }
}

/// Stable multi-key sort. Missing values order before present ones.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &[SortBy]) {
    if sort.is_empty() {
        return;
    }
    trace!(sort_criteria = ?sort, "Applying sort criteria");
    documents.sort_by(|a, b| {
        for sort_by in sort {
            let comparison = compare_option_json_values(
                a.get_field_value(&sort_by.field),
                b.get_field_value(&sort_by.field),
            );
            let result = match sort_by.order {
                SortOrder::Asc => comparison,
                SortOrder::Desc => comparison.reverse(),
            };
            if result != Ordering::Equal {
                return result;
            }
        }
        Ordering::Equal
    });
}

/// Every filter must hold; a document lacking a filtered field never matches.
fn check_doc_matches_filters(doc: &Document, filters: &Fields) -> bool {
    for (field_name, filter_value) in filters {
        let Some(doc_value) = doc.get_field_value(field_name) else {
            trace!(doc_id = %doc.id(), filter_field = field_name, "Field not present in document, skipping doc.");
            return false;
        };
        if !match_value(doc_value, filter_value) {
            trace!(doc_id = %doc.id(), filter_field = field_name, "Filter condition not met, skipping doc.");
            return false;
        }
    }
    true
}

fn match_value(doc_value: &Value, filter_condition: &Value) -> bool {
    match filter_condition {
        Value::String(filter_str) => doc_value
            .as_str()
            .is_some_and(|doc_str| doc_str == filter_str),
        Value::Number(filter_num) => {
            doc_value
                .as_i64()
                .zip(filter_num.as_i64())
                .is_some_and(|(d, f)| d == f)
                || doc_value
                    .as_f64()
                    .zip(filter_num.as_f64())
                    .is_some_and(|(d, f)| (d - f).abs() < f64::EPSILON)
        }
        Value::Bool(filter_bool) => doc_value.as_bool() == Some(*filter_bool),

        // Range operators. Both sides must be numbers or both strings.
        Value::Object(filter_ops) => {
            for (op, op_value) in filter_ops {
                let Some(ordering) = compare_same_kind(doc_value, op_value) else {
                    trace!(op = %op, "Range operand has a different kind than the document value, failing match.");
                    return false;
                };
                let holds = match op.as_str() {
                    "gte" => ordering != Ordering::Less,
                    "lte" => ordering != Ordering::Greater,
                    "gt" => ordering == Ordering::Greater,
                    "lt" => ordering == Ordering::Less,
                    _ => {
                        trace!("Unsupported filter operator: {}", op);
                        false
                    }
                };
                if !holds {
                    return false;
                }
            }
            true
        }

        // Any-of
        Value::Array(options) => options
            .iter()
            .any(|option| !option.is_array() && !option.is_object() && match_value(doc_value, option)),

        Value::Null => doc_value.is_null(),
    }
}

fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Helper function to compare Option<Value> for sorting
fn compare_option_json_values(opt_a: Option<&Value>, opt_b: Option<&Value>) -> Ordering {
    match (opt_a, opt_b) {
        (Some(a), Some(b)) => compare_json_values(a, b),
        (Some(_), None) => Ordering::Greater, // Values > missing
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Compares two values based on their underlying type.
fn compare_json_values(a: &Value, b: &Value) -> Ordering {
    if let (Some(num_a), Some(num_b)) = (a.as_f64(), b.as_f64()) {
        return num_a.partial_cmp(&num_b).unwrap_or(Ordering::Equal);
    }
    if let (Some(str_a), Some(str_b)) = (a.as_str(), b.as_str()) {
        return str_a.cmp(str_b);
    }
    if let (Some(bool_a), Some(bool_b)) = (a.as_bool(), b.as_bool()) {
        return bool_a.cmp(&bool_b);
    }
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less, // nulls first
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal, // mismatched kinds
    }
}
