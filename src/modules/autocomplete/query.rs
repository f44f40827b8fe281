use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json, RequestPartsExt,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub type Row = Map<String, Value>;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

#[derive(Debug, PartialEq)]
pub enum Error {
    InvalidField(String),
    InvalidValue(String),
}

pub fn validate_identifier(name: &str) -> Result<(), Error> {
    if IDENTIFIER.is_match(name) && !name.contains("__") {
        Ok(())
    } else {
        Err(Error::InvalidField(name.to_string()))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LookupOp {
    Exact,
    Iexact,
    Contains,
    Icontains,
    Startswith,
    Istartswith,
    In,
}

impl LookupOp {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "exact" => Some(Self::Exact),
            "iexact" => Some(Self::Iexact),
            "contains" => Some(Self::Contains),
            "icontains" => Some(Self::Icontains),
            "startswith" => Some(Self::Startswith),
            "istartswith" => Some(Self::Istartswith),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    pub fn is_case_insensitive(&self) -> bool {
        matches!(self, Self::Iexact | Self::Icontains | Self::Istartswith)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Lookup {
    pub field: String,
    pub op: LookupOp,
    pub value: Value,
}

impl Lookup {
    /// Parses a `field__op` spec such as `title__icontains`. A bare field
    /// name means an exact match.
    pub fn parse(spec: &str, value: Value) -> Result<Self, Error> {
        let (field, op) = match spec.rsplit_once("__") {
            Some((field, suffix)) => {
                let op = LookupOp::from_suffix(suffix)
                    .ok_or_else(|| Error::InvalidField(spec.to_string()))?;
                (field, op)
            }
            None => (spec, LookupOp::Exact),
        };

        let lookup = Self {
            field: field.to_string(),
            op,
            value,
        };
        lookup.validate()?;

        Ok(lookup)
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_identifier(&self.field)?;

        match (self.op, &self.value) {
            (LookupOp::In, Value::Array(_)) => Ok(()),
            (LookupOp::In, _) | (_, Value::Array(_) | Value::Object(_)) => {
                Err(Error::InvalidValue(self.field.clone()))
            }
            _ => Ok(()),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        let Some(actual) = row.get(&self.field).and_then(as_text) else {
            return false;
        };

        if let LookupOp::In = self.op {
            return self
                .value
                .as_array()
                .map(|values| values.iter().filter_map(as_text).any(|v| v == actual))
                .unwrap_or(false);
        }

        let Some(expected) = as_text(&self.value) else {
            return false;
        };

        let (actual, expected) = if self.op.is_case_insensitive() {
            (actual.to_lowercase(), expected.to_lowercase())
        } else {
            (actual, expected)
        };

        match self.op {
            LookupOp::Exact | LookupOp::Iexact => actual == expected,
            LookupOp::Contains | LookupOp::Icontains => actual.contains(&expected),
            LookupOp::Startswith | LookupOp::Istartswith => actual.starts_with(&expected),
            LookupOp::In => false,
        }
    }
}

/// Scalar JSON values compared on their text form, so a query-string `"3"`
/// matches a numeric `3` column.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    All { filters: Vec<Filter> },
    Any { filters: Vec<Filter> },
    Lookup(Lookup),
}

impl Filter {
    pub fn all(filters: Vec<Filter>) -> Self {
        Self::All { filters }
    }

    pub fn any(filters: Vec<Filter>) -> Self {
        Self::Any { filters }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::All { filters } => filters.iter().all(|f| f.matches(row)),
            Self::Any { filters } => filters.iter().any(|f| f.matches(row)),
            Self::Lookup(lookup) => lookup.matches(row),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::All { filters } | Self::Any { filters } => {
                filters.iter().try_for_each(Filter::validate)
            }
            Self::Lookup(lookup) => lookup.validate(),
        }
    }
}

/// Joins optional constraints with AND, dropping the absent ones.
pub fn and_all(filters: impl IntoIterator<Item = Option<Filter>>) -> Option<Filter> {
    let mut filters: Vec<Filter> = filters.into_iter().flatten().collect();

    match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(Filter::all(filters)),
    }
}

/// Every word of `term` must hit at least one search field, or the whole
/// term must hit one of them. A term made only of whitespace has no words
/// and is matched as a whole.
pub fn build_search_filter(search_fields: &[String], term: &str) -> Result<Option<Filter>, Error> {
    if search_fields.is_empty() || term.is_empty() {
        return Ok(None);
    }

    let any_field = |needle: &str| -> Result<Filter, Error> {
        search_fields
            .iter()
            .map(|spec| Lookup::parse(spec, Value::String(needle.to_string())).map(Filter::Lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Filter::any)
    };

    let words = term
        .split_whitespace()
        .map(any_field)
        .collect::<Result<Vec<_>, _>>()?;

    let whole_term = any_field(term)?;
    if words.is_empty() {
        return Ok(Some(whole_term));
    }

    Ok(Some(Filter::any(vec![Filter::all(words), whole_term])))
}

/// Ordered multi-map of query-string parameters.
#[derive(Debug, Clone, Default)]
pub struct QueryParams(pub Vec<(String, String)>);

impl QueryParams {
    /// Last value wins when a key repeats.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_list(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for QueryParams {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extract::<Query<Vec<(String, String)>>>().await {
            Ok(Query(pairs)) => Ok(Self(pairs)),
            _ => Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid query string" })),
            )
                .into_response()),
        }
    }
}

/// Constraints coming from other form fields the widget depends on: a single
/// value under `form_field`, or a list under `form_field[]`. Blank values are
/// ignored.
pub fn build_dependent_filter(
    dependent_fields: &BTreeMap<String, String>,
    params: &QueryParams,
) -> Result<Option<Filter>, Error> {
    let mut filters = vec![];

    for (form_field, model_field) in dependent_fields {
        if let Some(value) = params.get(form_field).filter(|v| !v.is_empty()) {
            filters.push(Filter::Lookup(Lookup::parse(
                model_field,
                Value::String(value.to_string()),
            )?));
        }

        let values: Vec<Value> = params
            .get_list(&format!("{form_field}[]"))
            .into_iter()
            .map(|v| Value::String(v.to_string()))
            .collect();

        if !values.is_empty() {
            filters.push(Filter::Lookup(Lookup::parse(
                &format!("{model_field}__in"),
                Value::Array(values),
            )?));
        }
    }

    Ok(and_all(filters.into_iter().map(Some)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        QueryParams(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn parses_lookup_specs() {
        let lookup = Lookup::parse("title__icontains", json!("rock")).unwrap();
        assert_eq!(lookup.field, "title");
        assert_eq!(lookup.op, LookupOp::Icontains);

        let lookup = Lookup::parse("country_id", json!("3")).unwrap();
        assert_eq!(lookup.op, LookupOp::Exact);
    }

    #[test]
    fn rejects_relations_and_bad_names() {
        assert_eq!(
            Lookup::parse("country__name__icontains", json!("x")),
            Err(Error::InvalidField("country__name".to_string()))
        );
        assert!(Lookup::parse("title__regex", json!("x")).is_err());
        assert!(Lookup::parse("1title", json!("x")).is_err());
        assert!(Lookup::parse("title; DROP", json!("x")).is_err());
        assert!(Lookup::parse("id__in", json!("1")).is_err());
        assert!(Lookup::parse("id", json!(["1"])).is_err());
    }

    #[test]
    fn evaluates_lookups_against_rows() {
        let city = row(json!({"id": 7, "name": "New Amsterdam", "country_id": 3}));

        assert!(Lookup::parse("name__icontains", json!("AMSTER")).unwrap().matches(&city));
        assert!(!Lookup::parse("name__contains", json!("AMSTER")).unwrap().matches(&city));
        assert!(Lookup::parse("name__istartswith", json!("new")).unwrap().matches(&city));
        assert!(Lookup::parse("name__iexact", json!("new amsterdam")).unwrap().matches(&city));
        assert!(Lookup::parse("country_id", json!("3")).unwrap().matches(&city));
        assert!(Lookup::parse("country_id__in", json!(["1", "3"])).unwrap().matches(&city));
        assert!(!Lookup::parse("country_id__in", json!(["1"])).unwrap().matches(&city));
        assert!(!Lookup::parse("missing", json!("3")).unwrap().matches(&city));
    }

    #[test]
    fn search_requires_every_word_or_the_whole_term() {
        let fields = vec!["name__icontains".to_string(), "code__iexact".to_string()];
        let filter = build_search_filter(&fields, "new dam").unwrap().unwrap();

        assert!(filter.matches(&row(json!({"name": "New Amsterdam", "code": "NA"}))));
        assert!(!filter.matches(&row(json!({"name": "New York", "code": "NY"}))));

        let filter = build_search_filter(&fields, "n y").unwrap().unwrap();
        assert!(filter.matches(&row(json!({"name": "Paris", "code": "N Y"}))));
    }

    #[test]
    fn empty_term_or_no_fields_means_no_constraint() {
        let fields = vec!["name__icontains".to_string()];

        assert_eq!(build_search_filter(&fields, ""), Ok(None));
        assert_eq!(build_search_filter(&[], "rock"), Ok(None));
    }

    #[test]
    fn whitespace_term_is_matched_whole() {
        let fields = vec!["title__icontains".to_string()];

        let filter = build_search_filter(&fields, "  ").unwrap().unwrap();
        assert_eq!(
            filter,
            Filter::any(vec![Filter::Lookup(
                Lookup::parse("title__icontains", json!("  ")).unwrap()
            )])
        );
        assert!(!filter.matches(&row(json!({"title": "Rock"}))));
        assert!(!filter.matches(&row(json!({"title": "Punk Rock"}))));
        assert!(filter.matches(&row(json!({"title": "Punk  Rock"}))));
    }

    #[test]
    fn dependent_fields_map_form_names_to_model_fields() {
        let dependent = BTreeMap::from([("country".to_string(), "country_id".to_string())]);

        let filter = build_dependent_filter(&dependent, &params(&[("country", "3")]))
            .unwrap()
            .unwrap();
        assert_eq!(
            filter,
            Filter::Lookup(Lookup {
                field: "country_id".to_string(),
                op: LookupOp::Exact,
                value: json!("3"),
            })
        );

        let filter = build_dependent_filter(
            &dependent,
            &params(&[("country[]", "1"), ("country[]", "2"), ("country", "")]),
        )
        .unwrap()
        .unwrap();
        assert!(filter.matches(&row(json!({"country_id": 2}))));
        assert!(!filter.matches(&row(json!({"country_id": 3}))));

        assert_eq!(build_dependent_filter(&dependent, &params(&[])), Ok(None));
    }

    #[test]
    fn last_query_value_wins() {
        let params = params(&[("term", "a"), ("term", "b")]);

        assert_eq!(params.get("term"), Some("b"));
        assert_eq!(params.get_list("term"), vec!["a", "b"]);
    }

    #[test]
    fn filters_deserialize_from_tagged_json() {
        let filter: Filter = serde_json::from_value(json!({
            "type": "all",
            "filters": [
                {"type": "lookup", "field": "active", "op": "exact", "value": true}
            ]
        }))
        .unwrap();

        assert!(filter.validate().is_ok());
        assert!(filter.matches(&row(json!({"active": true}))));
        assert!(!filter.matches(&row(json!({"active": false}))));
    }
}
