//! Elasticsearch REST client.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use sync_core::Document;

use crate::bulk::to_ndjson;
use crate::{BulkOperation, BulkResponse, IndexSink, SinkError};

/// Connection options for the target cluster.
#[derive(Debug, Clone)]
pub struct ElasticsearchOpts {
    /// Base URL, e.g. `http://localhost:9200`.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ElasticsearchOpts {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`IndexSink`] backed by the Elasticsearch REST API.
pub struct ElasticsearchSink {
    client: Client,
    base: Url,
    opts: ElasticsearchOpts,
}

impl ElasticsearchSink {
    pub fn new(opts: ElasticsearchOpts) -> Result<Self, SinkError> {
        let base = Url::parse(opts.url.trim_end_matches('/'))
            .map_err(|e| SinkError::Fatal(format!("Invalid target url '{}': {e}", opts.url)))?;
        if base.cannot_be_a_base() {
            return Err(SinkError::Fatal(format!(
                "Target url '{}' cannot carry a path",
                opts.url
            )));
        }
        let client = Client::builder()
            .timeout(opts.timeout)
            .build()
            .map_err(|e| SinkError::Fatal(format!("Failed to build HTTP client: {e}")))?;

        tracing::debug!("Elasticsearch sink targeting {}", base);
        Ok(Self { client, base, opts })
    }

    /// Build `base/<segments...>` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.opts.username {
            Some(username) => builder.basic_auth(username, self.opts.password.as_ref()),
            None => builder,
        }
    }
}

async fn error_body(response: reqwest::Response) -> Value {
    response.json::<Value>().await.unwrap_or(Value::Null)
}

fn error_type(body: &Value) -> Option<&str> {
    body.get("error")
        .and_then(|e| e.get("type"))
        .and_then(Value::as_str)
}

#[async_trait::async_trait]
impl IndexSink for ElasticsearchSink {
    async fn ensure_index(&self, index: &str) -> Result<(), SinkError> {
        let url = self.url(&[index]);

        let exists = self.request(Method::HEAD, url.clone()).send().await?;
        if exists.status().is_success() {
            return Ok(());
        }
        if exists.status() != StatusCode::NOT_FOUND {
            return Err(SinkError::from_status(
                exists.status().as_u16(),
                format!("Checking index '{index}'"),
            ));
        }

        let response = self.request(Method::PUT, url).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!("Created index '{index}'");
            return Ok(());
        }

        let body = error_body(response).await;
        // Lost a creation race with another writer.
        if error_type(&body) == Some("resource_already_exists_exception") {
            return Ok(());
        }
        Err(SinkError::from_status(
            status.as_u16(),
            format!("Creating index '{index}': {body}"),
        ))
    }

    async fn delete_index(&self, index: &str) -> Result<(), SinkError> {
        let response = self
            .request(Method::DELETE, self.url(&[index]))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!("Deleted index '{index}'");
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            tracing::debug!("Index '{index}' did not exist");
            return Ok(());
        }
        Err(SinkError::from_status(
            status.as_u16(),
            format!("Deleting index '{index}'"),
        ))
    }

    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, SinkError> {
        if operations.is_empty() {
            return Ok(BulkResponse::default());
        }

        let body = to_ndjson(operations)?;
        let response = self
            .request(Method::POST, self.url(&["_bulk"]))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(SinkError::from_status(
                status.as_u16(),
                format!("Bulk request: {body}"),
            ));
        }

        let body: Value = response.json().await?;
        let parsed = BulkResponse::parse(&body, operations)?;
        tracing::debug!(
            "Bulk request of {} operations took {}ms",
            operations.len(),
            body.get("took").and_then(serde_json::Value::as_u64).unwrap_or(0)
        );
        Ok(parsed)
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Document>, SinkError> {
        let response = self
            .request(Method::GET, self.url(&[index, "_doc", id]))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SinkError::from_status(
                status.as_u16(),
                format!("Reading document '{index}/{id}'"),
            ));
        }

        let body: Value = response.json().await?;
        match body.get("_source") {
            Some(Value::Object(source)) => Ok(Some(source.clone())),
            _ => Err(SinkError::Fatal(format!(
                "Document '{index}/{id}' has no object _source"
            ))),
        }
    }

    async fn put_document(
        &self,
        index: &str,
        id: &str,
        document: &Document,
    ) -> Result<(), SinkError> {
        let mut url = self.url(&[index, "_doc", id]);
        url.query_pairs_mut().append_pair("refresh", "true");

        let response = self.request(Method::PUT, url).json(document).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(SinkError::from_status(
                status.as_u16(),
                format!("Writing document '{index}/{id}': {body}"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_segments_are_encoded() {
        let sink = ElasticsearchSink::new(ElasticsearchOpts {
            url: "http://localhost:9200/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            sink.url(&["river-orders", "_doc", "a/b c"]).as_str(),
            "http://localhost:9200/river-orders/_doc/a%2Fb%20c"
        );
        assert_eq!(sink.url(&["_bulk"]).as_str(), "http://localhost:9200/_bulk");
    }

    #[test]
    fn test_url_keeps_base_path() {
        let sink = ElasticsearchSink::new(ElasticsearchOpts {
            url: "https://proxy.example.com/es".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            sink.url(&["orders"]).as_str(),
            "https://proxy.example.com/es/orders"
        );
    }

    #[test]
    fn test_invalid_url_is_fatal() {
        let err = ElasticsearchSink::new(ElasticsearchOpts {
            url: "not a url".to_string(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_type_extraction() {
        let body = serde_json::json!({
            "error": {"type": "resource_already_exists_exception", "reason": "index exists"},
            "status": 400
        });
        assert_eq!(error_type(&body), Some("resource_already_exists_exception"));
        assert_eq!(error_type(&Value::Null), None);
    }
}
