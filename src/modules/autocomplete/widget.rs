use super::query::{self, Filter, Lookup, QueryParams, Row};
use super::repository::QuerySpec;
use crate::types::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use ulid::Ulid;
use validator::Validate;

pub const DEFAULT_MAX_RESULTS: u32 = 25;

fn default_max_results() -> u32 {
    DEFAULT_MAX_RESULTS
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Everything needed to answer autocomplete requests for one rendered field.
/// This is what sits in the cache behind a `field_id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Validate)]
pub struct WidgetConfig {
    #[validate(length(min = 1, max = 64))]
    pub kind: String,
    pub query: QuerySpec,
    /// Path of the endpoint the token was issued for.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub dependent_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub search_fields: Vec<String>,
    #[serde(default = "default_max_results")]
    #[validate(range(min = 1, max = 1000))]
    pub max_results: u32,
    #[serde(default)]
    pub label_field: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

impl WidgetConfig {
    /// Checks every field name the config will later turn into lookups.
    pub fn validate_fields(&self) -> Result<(), query::Error> {
        self.query.validate()?;

        for spec in &self.search_fields {
            Lookup::parse(spec, Value::String(String::new()))?;
        }

        for model_field in self.dependent_fields.values() {
            query::validate_identifier(model_field)?;
        }

        query::validate_identifier(&self.id_field)?;
        if let Some(label_field) = &self.label_field {
            query::validate_identifier(label_field)?;
        }

        Ok(())
    }
}

/// Hooks a widget kind may override. The defaults behave like a plain model
/// select.
pub trait WidgetKind: Send + Sync {
    fn filter_queryset(
        &self,
        config: &WidgetConfig,
        term: &str,
        params: &QueryParams,
    ) -> Result<Option<Filter>, query::Error> {
        let search = query::build_search_filter(&config.search_fields, term)?;
        let dependent = query::build_dependent_filter(&config.dependent_fields, params)?;

        Ok(query::and_all([search, dependent]))
    }

    fn label_from_instance(&self, config: &WidgetConfig, row: &Row) -> String {
        let search_field = config
            .search_fields
            .first()
            .and_then(|spec| Lookup::parse(spec, Value::String(String::new())).ok())
            .map(|lookup| lookup.field);

        config
            .label_field
            .iter()
            .chain(search_field.iter())
            .chain(std::iter::once(&config.id_field))
            .find_map(|field| row.get(field).and_then(query::as_text))
            .unwrap_or_default()
    }

    fn result_from_instance(&self, config: &WidgetConfig, row: &Row) -> Value {
        json!({
            "id": row.get(&config.id_field).cloned().unwrap_or(Value::Null),
            "text": self.label_from_instance(config, row),
        })
    }
}

pub struct ModelWidget;

impl WidgetKind for ModelWidget {}

/// Tag inputs submit the label itself, so it doubles as the id.
pub struct TagWidget;

impl WidgetKind for TagWidget {
    fn result_from_instance(&self, config: &WidgetConfig, row: &Row) -> Value {
        let label = self.label_from_instance(config, row);
        json!({ "id": label, "text": label })
    }
}

#[derive(Clone)]
pub struct WidgetRegistry {
    kinds: HashMap<String, Arc<dyn WidgetKind>>,
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::empty()
            .with_kind("model", Arc::new(ModelWidget))
            .with_kind("tag", Arc::new(TagWidget))
    }
}

impl WidgetRegistry {
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    pub fn with_kind(mut self, name: &str, kind: Arc<dyn WidgetKind>) -> Self {
        self.kinds.insert(name.to_string(), kind);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn WidgetKind>> {
        self.kinds.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }
}

/// A cached config bound to the kind that formats and filters for it.
pub struct Widget {
    pub config: WidgetConfig,
    kind: Arc<dyn WidgetKind>,
}

impl Widget {
    pub fn new(config: WidgetConfig, kind: Arc<dyn WidgetKind>) -> Self {
        Self { config, kind }
    }

    pub fn filter_queryset(
        &self,
        term: &str,
        params: &QueryParams,
    ) -> Result<Option<Filter>, query::Error> {
        self.kind.filter_queryset(&self.config, term, params)
    }

    pub fn result_from_instance(&self, row: &Row) -> Value {
        self.kind.result_from_instance(&self.config, row)
    }
}

#[derive(Debug, PartialEq)]
pub enum Error {
    MissingFieldId,
    InvalidFieldId,
    NotFound,
    WrongUrl,
    UnknownKind(String),
    InvalidConfig(String),
    UnexpectedError,
}

fn cache_key(ctx: &Context, key: &str) -> String {
    format!("{}{}", ctx.autocomplete.cache_prefix, key)
}

/// Parks `config` in the widget cache and returns the signed `field_id`
/// the page should send back with every autocomplete request.
pub async fn register(ctx: &Context, config: WidgetConfig) -> Result<String, Error> {
    config.validate().map_err(|err| Error::InvalidConfig(err.to_string()))?;
    config.validate_fields().map_err(|err| {
        tracing::warn!("Rejected widget config: {:?}", err);
        Error::InvalidConfig(format!("{:?}", err))
    })?;

    if !ctx.widgets.contains(&config.kind) {
        return Err(Error::UnknownKind(config.kind));
    }

    let key = Ulid::new().to_string();
    let value = serde_json::to_value(&config).map_err(|err| {
        tracing::error!("Failed to serialize widget config: {}", err);
        Error::UnexpectedError
    })?;

    ctx.cache
        .set(&cache_key(ctx, &key), value, ctx.autocomplete.cache_ttl)
        .await;

    ctx.signer.dumps(&key).map_err(|err| {
        tracing::error!("Failed to sign widget key {}: {:?}", key, err);
        Error::UnexpectedError
    })
}

/// Recovers the widget a `field_id` was issued for, as long as the request
/// comes in on the same path.
pub async fn get_widget(ctx: &Context, field_id: Option<&str>, path: &str) -> Result<Widget, Error> {
    let field_id = field_id
        .filter(|field_id| !field_id.is_empty())
        .ok_or(Error::MissingFieldId)?;

    let key: String = ctx
        .signer
        .loads(field_id, ctx.autocomplete.token_max_age)
        .map_err(|err| {
            tracing::debug!("Rejected field_id: {:?}", err);
            Error::InvalidFieldId
        })?;

    let value = ctx
        .cache
        .get(&cache_key(ctx, &key))
        .await
        .ok_or(Error::NotFound)?;

    let config: WidgetConfig = serde_json::from_value(value).map_err(|err| {
        tracing::error!("Cached widget config {} is unreadable: {}", key, err);
        Error::NotFound
    })?;

    if config.url != path {
        return Err(Error::WrongUrl);
    }

    let kind = ctx
        .widgets
        .get(&config.kind)
        .ok_or_else(|| Error::UnknownKind(config.kind.clone()))?;

    Ok(Widget::new(config, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WidgetConfig {
        serde_json::from_value(json!({
            "kind": "model",
            "query": {"source": "genres"},
            "search_fields": ["title__icontains"],
        }))
        .unwrap()
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn config_defaults() {
        let config = config();

        assert_eq!(config.max_results, DEFAULT_MAX_RESULTS);
        assert_eq!(config.id_field, "id");
        assert!(config.dependent_fields.is_empty());
        assert!(config.validate().is_ok());
        assert!(config.validate_fields().is_ok());
    }

    #[test]
    fn config_field_names_are_checked() {
        let mut config = config();
        config.search_fields.push("artist__title__icontains".to_string());
        assert!(config.validate_fields().is_err());

        let mut config = self::config();
        config
            .dependent_fields
            .insert("artist".to_string(), "artist id".to_string());
        assert!(config.validate_fields().is_err());

        let mut config = self::config();
        config.max_results = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn model_widget_formats_id_and_label() {
        let config = config();
        let result = ModelWidget.result_from_instance(&config, &row(json!({"id": 3, "title": "Jazz"})));

        assert_eq!(result, json!({"id": 3, "text": "Jazz"}));
    }

    #[test]
    fn label_prefers_the_label_field_and_falls_back_to_the_id() {
        let mut config = config();
        config.label_field = Some("name".to_string());

        let row_with_name = row(json!({"id": 1, "name": "Blue Note", "title": "ignored"}));
        assert_eq!(ModelWidget.label_from_instance(&config, &row_with_name), "Blue Note");

        config.search_fields.clear();
        let bare = row(json!({"id": 9}));
        assert_eq!(ModelWidget.label_from_instance(&config, &bare), "9");
    }

    #[test]
    fn tag_widget_uses_the_label_as_id() {
        let config = config();
        let result = TagWidget.result_from_instance(&config, &row(json!({"id": 3, "title": "Jazz"})));

        assert_eq!(result, json!({"id": "Jazz", "text": "Jazz"}));
    }

    #[test]
    fn registry_ships_model_and_tag_kinds() {
        let registry = WidgetRegistry::default();

        assert!(registry.contains("model"));
        assert!(registry.contains("tag"));
        assert!(registry.get("heavy").is_none());
    }
}
