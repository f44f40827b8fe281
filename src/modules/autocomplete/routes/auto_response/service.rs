use super::types::{request, response};
use crate::{
    modules::autocomplete::{repository, widget},
    types::Context,
    utils::pagination::{PageNumber, Paginated, Paginator},
};
use std::sync::Arc;

fn fetch_failed(err: repository::Error) -> response::Error {
    tracing::error!("Failed to fetch autocomplete results: {:?}", err);
    response::Error::FailedToFetchResults
}

pub async fn service(ctx: Arc<Context>, payload: request::Payload) -> response::Response {
    let widget =
        widget::get_widget(&ctx, payload.params.get("field_id"), &payload.path).await?;

    let term = payload.params.get("term").unwrap_or_default();
    let filter = widget
        .filter_queryset(term, &payload.params)
        .map_err(|err| {
            tracing::error!("Failed to build autocomplete filter: {:?}", err);
            response::Error::FailedToFetchResults
        })?;

    let page_number =
        PageNumber::parse(payload.params.get("page")).map_err(|_| response::Error::InvalidPage)?;

    let query = widget
        .config
        .query
        .clone()
        .with_default_order(&widget.config.id_field);
    let count = ctx
        .dataset
        .count(&query, filter.as_ref())
        .await
        .map_err(fetch_failed)?;

    let paginator = Paginator::new(count, widget.config.max_results);
    let page = paginator
        .validate(page_number)
        .map_err(|_| response::Error::InvalidPage)?;

    let rows = ctx
        .dataset
        .fetch(&query, filter.as_ref(), page)
        .await
        .map_err(fetch_failed)?;

    tracing::debug!(
        "Autocomplete on {} for {:?}: page {} of {} rows",
        query.source,
        term,
        page.number,
        count
    );

    Ok(response::Success::Results(Paginated::new(
        rows.iter()
            .map(|row| widget.result_from_instance(row))
            .collect(),
        paginator.has_next(&page),
    )))
}
