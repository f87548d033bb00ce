use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::tenant::TenantScope;

use super::backend::{
    ChangeEvent, ChangeFeed, ChangeStream, CollectionQuery, FeedFilter, RemoteBackend,
};
use super::entity::{EntityKind, RecordId, TENANT_FIELD};
use super::error::RemoteError;

/// REST client for the remote data service.
///
/// Collections live at `{base}/{table}`, rows at `{base}/{table}/{id}`, and filters use the
/// `field=eq.value` query convention. The change feed is a newline-delimited JSON stream at
/// `{base}/{table}/changes`.
pub struct HttpBackend {
    base_url: Url,
    headers: HeaderMap,
    client: Client,
    feed_client: Client,
}

impl HttpBackend {
    pub fn new(
        base_url: Url,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Unavailable(format!(
                "backend url '{base_url}' cannot carry a path"
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let invalid = |_| RemoteError::Unavailable("api key is not a valid header".to_string());
            headers.insert("apikey", HeaderValue::from_str(&key).map_err(invalid)?);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(invalid)?,
            );
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|err| RemoteError::Unavailable(err.to_string()))?;
        // Feeds stay open indefinitely, so only the connect phase is bounded.
        let feed_client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| RemoteError::Unavailable(err.to_string()))?;

        Ok(Self {
            base_url,
            headers,
            client,
            feed_client,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Unavailable("backend url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.headers(self.headers.clone())
    }
}

fn eq(value: &Value) -> String {
    match value {
        Value::String(text) => format!("eq.{text}"),
        other => format!("eq.{other}"),
    }
}

fn scope_params(scope: &TenantScope) -> Vec<(String, String)> {
    scope
        .key()
        .map(|key| vec![(TENANT_FIELD.to_string(), format!("eq.{key}"))])
        .unwrap_or_default()
}

fn collection_params(query: &CollectionQuery) -> Vec<(String, String)> {
    let mut params = scope_params(&query.scope);
    params.extend(
        query
            .filters
            .iter()
            .map(|filter| (filter.field.clone(), eq(&filter.value))),
    );
    if let Some(order) = &query.order {
        let direction = if order.descending { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{}.{direction}", order.field)));
    }
    params
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Unavailable(err.to_string())
}

async fn rejected(response: Response) -> RemoteError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    RemoteError::Rejected { status, message }
}

async fn decode(kind: EntityKind, response: Response) -> Result<Value, RemoteError> {
    if !response.status().is_success() {
        return Err(rejected(response).await);
    }
    response
        .json::<Value>()
        .await
        .map_err(|err| RemoteError::Decode {
            kind,
            message: err.to_string(),
        })
}

/// Accepts either a bare row or the single-row array some services answer writes with.
fn single_row(kind: EntityKind, value: Value) -> Result<Value, RemoteError> {
    match value {
        Value::Array(mut rows) if rows.len() == 1 => Ok(rows.remove(0)),
        Value::Object(_) => Ok(value),
        other => Err(RemoteError::Decode {
            kind,
            message: format!("expected a single row, got {other}"),
        }),
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn select(&self, query: &CollectionQuery) -> Result<Vec<Value>, RemoteError> {
        let url = self.url(&[query.kind.table()])?;
        let response = self
            .request(self.client.get(url))
            .query(&collection_params(query))
            .send()
            .await
            .map_err(transport)?;

        match decode(query.kind, response).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(RemoteError::Decode {
                kind: query.kind,
                message: format!("expected an array of rows, got {other}"),
            }),
        }
    }

    async fn fetch(&self, kind: EntityKind, id: &RecordId) -> Result<Option<Value>, RemoteError> {
        let url = self.url(&[kind.table(), id.as_str()])?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(kind, response)
            .await
            .and_then(|value| single_row(kind, value))
            .map(Some)
    }

    async fn insert(&self, kind: EntityKind, record: Value) -> Result<Value, RemoteError> {
        let url = self.url(&[kind.table()])?;
        let response = self
            .request(self.client.post(url))
            .json(&record)
            .send()
            .await
            .map_err(transport)?;

        single_row(kind, decode(kind, response).await?)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &RecordId,
        scope: &TenantScope,
        patch: Value,
    ) -> Result<Value, RemoteError> {
        let url = self.url(&[kind.table(), id.as_str()])?;
        let response = self
            .request(self.client.put(url))
            .query(&scope_params(scope))
            .json(&patch)
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound {
                kind,
                id: id.clone(),
            });
        }
        single_row(kind, decode(kind, response).await?)
    }

    async fn delete(
        &self,
        kind: EntityKind,
        id: &RecordId,
        scope: &TenantScope,
    ) -> Result<(), RemoteError> {
        let url = self.url(&[kind.table(), id.as_str()])?;
        let response = self
            .request(self.client.delete(url))
            .query(&scope_params(scope))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound {
                kind,
                id: id.clone(),
            }),
            status if status.is_success() => Ok(()),
            _ => Err(rejected(response).await),
        }
    }
}

#[async_trait]
impl ChangeFeed for HttpBackend {
    async fn subscribe(&self, filter: &FeedFilter) -> Result<ChangeStream, RemoteError> {
        let url = self.url(&[filter.kind.table(), "changes"])?;
        let mut params = scope_params(&filter.scope);
        params.push(("event".to_string(), filter.event_selector().to_string()));

        let mut response = self
            .request(self.feed_client.get(url))
            .header(ACCEPT, "application/x-ndjson")
            .query(&params)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let (sender, receiver) = mpsc::channel(64);
        let filter = filter.clone();
        tokio::spawn(async move {
            let mut buffer = Vec::new();
            loop {
                let chunk = tokio::select! {
                    _ = sender.closed() => return,
                    chunk = response.chunk() => chunk,
                };
                match chunk {
                    Ok(Some(bytes)) => buffer.extend_from_slice(&bytes),
                    Ok(None) => break,
                    Err(err) => {
                        warn!(kind = %filter.kind, error = %err, "change feed read failed");
                        return;
                    }
                }
                for line in drain_lines(&mut buffer) {
                    if line.len() > MAX_FEED_LINE_BYTES {
                        warn!(kind = %filter.kind, bytes = line.len(), "change feed line too long; closing stream");
                        return;
                    }
                    if !forward(&filter, &sender, &line).await {
                        return;
                    }
                }
                if buffer.len() > MAX_FEED_LINE_BYTES {
                    warn!(kind = %filter.kind, bytes = buffer.len(), "change feed line too long; closing stream");
                    return;
                }
            }
            if !buffer.is_empty() {
                forward(&filter, &sender, &buffer).await;
            }
            debug!(kind = %filter.kind, scope = %filter.scope, "change feed closed by remote");
        });

        Ok(ChangeStream::new(receiver))
    }
}

/// Longest change-feed line accepted before the stream is dropped.
const MAX_FEED_LINE_BYTES: usize = 64 * 1024;

fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=position).collect();
        line.pop();
        lines.push(line);
    }
    lines
}

/// Returns `false` once the subscriber has gone away.
async fn forward(filter: &FeedFilter, sender: &mpsc::Sender<ChangeEvent>, line: &[u8]) -> bool {
    let trimmed = String::from_utf8_lossy(line);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() {
        return true;
    }
    match serde_json::from_str::<ChangeEvent>(trimmed) {
        Ok(event) if filter.matches(&event) => sender.send(event).await.is_ok(),
        Ok(_) => true,
        Err(err) => {
            warn!(kind = %filter.kind, error = %err, "skipping malformed change event");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::Filter;
    use crate::store::entity::Order;
    use crate::tenant::TenantKey;
    use serde_json::json;

    #[test]
    fn collection_params_carry_scope_filters_and_order() {
        let query = CollectionQuery {
            kind: EntityKind::Documents,
            scope: TenantScope::Tenant(TenantKey::new("dndc").expect("valid")),
            filters: vec![
                Filter::eq("application_id", "app-000007"),
                Filter::eq("is_uploaded", true),
            ],
            order: Some(Order::desc("created_at")),
        };

        assert_eq!(
            collection_params(&query),
            vec![
                ("tenant_id".to_string(), "eq.dndc".to_string()),
                ("application_id".to_string(), "eq.app-000007".to_string()),
                ("is_uploaded".to_string(), "eq.true".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
            ]
        );
    }

    #[test]
    fn global_scope_adds_no_tenant_filter() {
        assert!(scope_params(&TenantScope::Global).is_empty());
    }

    #[test]
    fn urls_append_table_and_id_segments() {
        let backend = HttpBackend::new(
            Url::parse("https://data.example.org/rest/v1/").expect("url"),
            None,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .expect("client");
        let url = backend
            .url(&["applications", "app 1"])
            .expect("url builds");
        assert_eq!(
            url.as_str(),
            "https://data.example.org/rest/v1/applications/app%201"
        );
    }

    #[test]
    fn lines_split_on_newlines_and_keep_partial_tail() {
        let mut buffer = b"{\"a\":1}\n\n{\"b\":2}\n{\"c\"".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].is_empty());
        assert_eq!(buffer, b"{\"c\"".to_vec());
    }

    #[test]
    fn single_row_unwraps_arrays() {
        let row = single_row(EntityKind::Alerts, json!([{ "id": "alr-1" }])).expect("row");
        assert_eq!(row["id"], "alr-1");
        assert!(single_row(EntityKind::Alerts, json!([])).is_err());
    }
}
