use super::query::{self, Filter, LookupOp, Row};
use crate::utils::pagination::PageRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{postgres::Postgres, types::Json, PgPool, QueryBuilder, Row as _};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

/// The stored query a widget searches in.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct QuerySpec {
    pub source: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<String>,
}

impl QuerySpec {
    pub fn validate(&self) -> Result<(), query::Error> {
        query::validate_identifier(&self.source)?;
        self.filters.iter().try_for_each(Filter::validate)?;
        self.order_by
            .iter()
            .try_for_each(|field| query::validate_identifier(field.trim_start_matches('-')))
    }

    /// Pages only line up when the rows have a fixed order, so an unordered
    /// query falls back to `field`.
    pub fn with_default_order(mut self, field: &str) -> Self {
        if self.order_by.is_empty() {
            self.order_by.push(field.to_string());
        }
        self
    }

    /// Base filters of the query plus the request's own constraint.
    fn constraint(&self, filter: Option<&Filter>) -> Option<Filter> {
        query::and_all(
            self.filters
                .iter()
                .cloned()
                .map(Some)
                .chain(std::iter::once(filter.cloned())),
        )
    }
}

#[derive(Debug)]
pub enum Error {
    UnknownSource(String),
    InvalidQuery(query::Error),
    UnexpectedError,
}

impl From<query::Error> for Error {
    fn from(err: query::Error) -> Self {
        Self::InvalidQuery(err)
    }
}

#[async_trait]
pub trait Dataset: Send + Sync {
    async fn count(&self, query: &QuerySpec, filter: Option<&Filter>) -> Result<u64, Error>;

    async fn fetch(
        &self,
        query: &QuerySpec,
        filter: Option<&Filter>,
        page: PageRequest,
    ) -> Result<Vec<Row>, Error>;
}

/// Named tables of JSON rows held in memory.
#[derive(Default)]
pub struct MemoryDataset {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, rows: Vec<Row>) -> Self {
        self.insert_table(name, rows);
        self
    }

    pub fn insert_table(&self, name: &str, rows: Vec<Row>) {
        match self.tables.write() {
            Ok(mut tables) => {
                tables.insert(name.to_string(), rows);
            }
            Err(err) => tracing::error!("Memory dataset lock poisoned: {}", err),
        }
    }

    fn select(&self, query: &QuerySpec, filter: Option<&Filter>) -> Result<Vec<Row>, Error> {
        query.validate()?;

        let tables = self.tables.read().map_err(|err| {
            tracing::error!("Memory dataset lock poisoned: {}", err);
            Error::UnexpectedError
        })?;

        let rows = tables
            .get(&query.source)
            .ok_or_else(|| Error::UnknownSource(query.source.clone()))?;

        let constraint = query.constraint(filter);
        let mut selected: Vec<Row> = rows
            .iter()
            .filter(|row| constraint.as_ref().map_or(true, |c| c.matches(row)))
            .cloned()
            .collect();

        selected.sort_by(|a, b| compare_rows(a, b, &query.order_by));

        Ok(selected)
    }
}

fn compare_rows(a: &Row, b: &Row, order_by: &[String]) -> Ordering {
    for spec in order_by {
        let (field, descending) = match spec.strip_prefix('-') {
            Some(field) => (field, true),
            None => (spec.as_str(), false),
        };

        let ordering = compare_values(a.get(field), b.get(field));
        let ordering = if descending { ordering.reverse() } else { ordering };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(a), Some(b)) => query::as_text(a).cmp(&query::as_text(b)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl Dataset for MemoryDataset {
    async fn count(&self, query: &QuerySpec, filter: Option<&Filter>) -> Result<u64, Error> {
        self.select(query, filter).map(|rows| rows.len() as u64)
    }

    async fn fetch(
        &self,
        query: &QuerySpec,
        filter: Option<&Filter>,
        page: PageRequest,
    ) -> Result<Vec<Row>, Error> {
        self.select(query, filter).map(|rows| {
            rows.into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect()
        })
    }
}

pub struct PgDataset {
    pool: PgPool,
}

impl PgDataset {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All { filters } | Filter::Any { filters } if filters.is_empty() => {
            builder.push(if matches!(filter, Filter::All { .. }) {
                "TRUE"
            } else {
                "FALSE"
            });
        }
        Filter::All { filters } | Filter::Any { filters } => {
            let joiner = if matches!(filter, Filter::All { .. }) {
                " AND "
            } else {
                " OR "
            };

            builder.push("(");
            for (i, inner) in filters.iter().enumerate() {
                if i > 0 {
                    builder.push(joiner);
                }
                push_filter(builder, inner);
            }
            builder.push(")");
        }
        Filter::Lookup(lookup) => {
            let column = format!("t.\"{}\"::TEXT", lookup.field);

            if lookup.op == LookupOp::In {
                let values: Vec<String> = lookup
                    .value
                    .as_array()
                    .map(|values| values.iter().filter_map(query::as_text).collect())
                    .unwrap_or_default();

                builder.push(format!("{column} = ANY("));
                builder.push_bind(values);
                builder.push(")");
                return;
            }

            let value = query::as_text(&lookup.value).unwrap_or_default();

            match lookup.op {
                LookupOp::Exact => {
                    builder.push(format!("{column} = "));
                    builder.push_bind(value);
                }
                LookupOp::Iexact => {
                    builder.push(format!("LOWER({column}) = LOWER("));
                    builder.push_bind(value);
                    builder.push(")");
                }
                LookupOp::Contains | LookupOp::Icontains => {
                    let operator = if lookup.op == LookupOp::Contains { "LIKE" } else { "ILIKE" };
                    builder.push(format!("{column} {operator} "));
                    builder.push_bind(format!("%{}%", escape_like(&value)));
                }
                LookupOp::Startswith | LookupOp::Istartswith => {
                    let operator = if lookup.op == LookupOp::Startswith { "LIKE" } else { "ILIKE" };
                    builder.push(format!("{column} {operator} "));
                    builder.push_bind(format!("{}%", escape_like(&value)));
                }
                LookupOp::In => (),
            }
        }
    }
}

fn push_from_where(builder: &mut QueryBuilder<'_, Postgres>, query: &QuerySpec, filter: Option<&Filter>) {
    builder.push(format!(" FROM \"{}\" AS t", query.source));

    if let Some(constraint) = query.constraint(filter) {
        builder.push(" WHERE ");
        push_filter(builder, &constraint);
    }
}

fn count_query<'a>(query: &QuerySpec, filter: Option<&Filter>) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*)");
    push_from_where(&mut builder, query, filter);
    builder
}

fn rows_query<'a>(
    query: &QuerySpec,
    filter: Option<&Filter>,
    page: PageRequest,
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new("SELECT TO_JSONB(t) AS row");
    push_from_where(&mut builder, query, filter);

    if !query.order_by.is_empty() {
        let ordering: Vec<String> = query
            .order_by
            .iter()
            .map(|spec| match spec.strip_prefix('-') {
                Some(field) => format!("t.\"{field}\" DESC"),
                None => format!("t.\"{spec}\" ASC"),
            })
            .collect();
        builder.push(format!(" ORDER BY {}", ordering.join(", ")));
    }

    builder.push(" LIMIT ");
    builder.push_bind(page.limit as i64);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset as i64);
    builder
}

#[async_trait]
impl Dataset for PgDataset {
    async fn count(&self, query: &QuerySpec, filter: Option<&Filter>) -> Result<u64, Error> {
        query.validate()?;

        let mut builder = count_query(query, filter);
        builder
            .build()
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get::<i64, _>(0))
            .map(|count| count.max(0) as u64)
            .map_err(|err| {
                tracing::error!(
                    "Error occurred while trying to count rows of {}: {}",
                    query.source,
                    err
                );
                Error::UnexpectedError
            })
    }

    async fn fetch(
        &self,
        query: &QuerySpec,
        filter: Option<&Filter>,
        page: PageRequest,
    ) -> Result<Vec<Row>, Error> {
        query.validate()?;

        let mut builder = rows_query(query, filter, page);
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|err| {
                tracing::error!(
                    "Error occurred while trying to fetch rows of {}: {}",
                    query.source,
                    err
                );
                Error::UnexpectedError
            })?;

        rows.iter()
            .map(|row| row.try_get::<Json<Row>, _>("row").map(|Json(row)| row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                tracing::error!("Failed to decode row of {}: {}", query.source, err);
                Error::UnexpectedError
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::autocomplete::query::Lookup;
    use serde_json::json;

    fn genres() -> Vec<Row> {
        ["Rock", "Jazz", "Punk Rock", "Blues", "Rockabilly"]
            .iter()
            .enumerate()
            .map(|(id, title)| {
                json!({"id": id, "title": title, "active": id != 3})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect()
    }

    fn page(offset: u64, limit: u32) -> PageRequest {
        PageRequest {
            number: offset / limit as u64 + 1,
            offset,
            limit,
        }
    }

    #[tokio::test]
    async fn memory_dataset_filters_orders_and_slices() {
        let dataset = MemoryDataset::new().with_table("genres", genres());
        let query = QuerySpec {
            source: "genres".to_string(),
            filters: vec![],
            order_by: vec!["title".to_string()],
        };
        let filter = Filter::Lookup(Lookup::parse("title__icontains", json!("rock")).unwrap());

        assert_eq!(dataset.count(&query, Some(&filter)).await.unwrap(), 3);

        let rows = dataset.fetch(&query, Some(&filter), page(1, 2)).await.unwrap();
        let titles: Vec<&str> = rows.iter().map(|r| r["title"].as_str().unwrap()).collect();
        assert_eq!(titles, vec!["Rock", "Rockabilly"]);
    }

    #[tokio::test]
    async fn memory_dataset_applies_base_filters_and_descending_order() {
        let dataset = MemoryDataset::new().with_table("genres", genres());
        let query = QuerySpec {
            source: "genres".to_string(),
            filters: vec![Filter::Lookup(Lookup::parse("active", json!(true)).unwrap())],
            order_by: vec!["-id".to_string()],
        };

        let rows = dataset.fetch(&query, None, page(0, 10)).await.unwrap();
        let ids: Vec<u64> = rows.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![4, 2, 1, 0]);
    }

    #[tokio::test]
    async fn memory_dataset_rejects_unknown_sources() {
        let dataset = MemoryDataset::new();
        let query = QuerySpec {
            source: "albums".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            dataset.count(&query, None).await,
            Err(Error::UnknownSource(source)) if source == "albums"
        ));
    }

    #[test]
    fn builds_parameterised_sql() {
        let query = QuerySpec {
            source: "cities".to_string(),
            filters: vec![],
            order_by: vec!["name".to_string(), "-id".to_string()],
        };
        let filter = Filter::all(vec![
            Filter::Lookup(Lookup::parse("name__icontains", json!("50%_off")).unwrap()),
            Filter::Lookup(Lookup::parse("country_id__in", json!(["1", "2"])).unwrap()),
        ]);

        let builder = rows_query(&query, Some(&filter), page(25, 25));
        assert_eq!(
            builder.sql(),
            "SELECT TO_JSONB(t) AS row FROM \"cities\" AS t \
             WHERE (t.\"name\"::TEXT ILIKE $1 AND t.\"country_id\"::TEXT = ANY($2)) \
             ORDER BY t.\"name\" ASC, t.\"id\" DESC LIMIT $3 OFFSET $4"
        );

        let builder = count_query(&query, None);
        assert_eq!(builder.sql(), "SELECT COUNT(*) FROM \"cities\" AS t");
    }

    #[test]
    fn unordered_queries_page_by_the_id_field() {
        let query = QuerySpec {
            source: "cities".to_string(),
            ..Default::default()
        }
        .with_default_order("id");

        assert_eq!(query.order_by, vec!["id".to_string()]);
        assert_eq!(
            rows_query(&query, None, page(0, 25)).sql(),
            "SELECT TO_JSONB(t) AS row FROM \"cities\" AS t \
             ORDER BY t.\"id\" ASC LIMIT $1 OFFSET $2"
        );

        let ordered = QuerySpec {
            source: "cities".to_string(),
            order_by: vec!["-name".to_string()],
            ..Default::default()
        }
        .with_default_order("id");
        assert_eq!(ordered.order_by, vec!["-name".to_string()]);
    }

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
