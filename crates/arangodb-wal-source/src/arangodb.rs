//! ArangoDB HTTP client for WAL tailing and collection scans.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::{json, Value};
use sync_core::{Document, Tick};
use tokio::sync::Mutex;

use crate::{CollectionInfo, ScanPage, SourceError, TailBatch, WalEntry, WalSource};

const HEADER_LAST_INCLUDED: &str = "x-arango-replication-lastincluded";
const HEADER_CHECK_MORE: &str = "x-arango-replication-checkmore";
const HEADER_FROM_PRESENT: &str = "x-arango-replication-frompresent";

/// ArangoDB error numbers that make a 404 fatal for a river.
const ERROR_COLLECTION_NOT_FOUND: u64 = 1203;
const ERROR_DATABASE_NOT_FOUND: u64 = 1228;

/// Connection options for the source server.
#[derive(Debug, Clone)]
pub struct ArangoOpts {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Approximate upper bound of one tail response in bytes.
    pub chunk_size: u64,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ArangoOpts {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8529,
            database: "_system".to_string(),
            username: None,
            password: None,
            chunk_size: 1024 * 1024,
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`WalSource`] backed by ArangoDB's `/_api/wal/tail` and cursor APIs.
pub struct ArangoWalSource {
    client: Client,
    base: Url,
    opts: ArangoOpts,
    cursors: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl ArangoWalSource {
    pub fn new(opts: ArangoOpts) -> Result<Self, SourceError> {
        let base = base_url(&opts.host, opts.port)?;

        let client = Client::builder()
            .timeout(opts.timeout)
            .build()
            .map_err(|e| SourceError::Fatal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            opts,
            cursors: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// `base/_db/<database>/<segments...>` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["_db", self.opts.database.as_str()])
                .extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Fatal("source connection closed".to_string()));
        }
        let builder = self.client.request(method, url);
        Ok(match &self.opts.username {
            Some(username) => builder.basic_auth(username, self.opts.password.as_ref()),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<Response, SourceError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(self.classify_failure(response, context).await)
    }

    async fn classify_failure(&self, response: Response, context: &str) -> SourceError {
        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        let message = body
            .get("errorMessage")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if status == StatusCode::NOT_FOUND {
            match body.get("errorNum").and_then(Value::as_u64) {
                Some(ERROR_DATABASE_NOT_FOUND) => {
                    return SourceError::Fatal(format!(
                        "Database '{}' does not exist",
                        self.opts.database
                    ))
                }
                Some(ERROR_COLLECTION_NOT_FOUND) => {
                    return SourceError::Fatal(format!("{context}: collection not found"))
                }
                _ => {}
            }
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return SourceError::Fatal(format!("{context}: authentication rejected"));
        }
        SourceError::from_status(status.as_u16(), format!("{context} {message}").trim_end())
    }

    async fn parse_page(&self, response: Response) -> Result<ScanPage, SourceError> {
        let body: Value = response.json().await?;
        let documents = body
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Fatal("Cursor response has no 'result' array".to_string()))?
            .iter()
            .filter_map(|doc| doc.as_object().cloned())
            .collect::<Vec<Document>>();

        let has_more = body.get("hasMore").and_then(Value::as_bool).unwrap_or(false);
        let cursor = if has_more {
            body.get("id").and_then(Value::as_str).map(str::to_string)
        } else {
            None
        };

        let mut cursors = self.cursors.lock().await;
        if let Some(id) = &cursor {
            cursors.insert(id.clone());
        }
        Ok(ScanPage { documents, cursor })
    }
}

/// Server root for `host`, which may carry a scheme (`https://...`) and a
/// port. `port` applies when `host` names none.
fn base_url(host: &str, port: u16) -> Result<Url, SourceError> {
    let host = host.trim().trim_end_matches('/');
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };
    let invalid =
        |reason: String| SourceError::Fatal(format!("Invalid source address '{raw}': {reason}"));

    let mut url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.path() != "/" {
        return Err(invalid("a source address cannot carry a path".to_string()));
    }
    if url.port().is_none() {
        url.set_port(Some(port))
            .map_err(|()| invalid("cannot carry a port".to_string()))?;
    }
    Ok(url)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_flag(headers: &HeaderMap, name: &str) -> Option<bool> {
    header(headers, name).map(|v| v.eq_ignore_ascii_case("true"))
}

/// Parse a tail response: headers plus newline-delimited JSON markers.
pub(crate) fn parse_tail(headers: &HeaderMap, body: &str) -> Result<TailBatch, SourceError> {
    let entries = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let value: Value = serde_json::from_str(line)
                .map_err(|e| SourceError::Fatal(format!("Malformed WAL line '{line}': {e}")))?;
            WalEntry::from_json(&value)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let last_included = header(headers, HEADER_LAST_INCLUDED)
        .map(Tick::new)
        .filter(|tick| !tick.is_origin());

    Ok(TailBatch {
        entries,
        last_included,
        from_present: header_flag(headers, HEADER_FROM_PRESENT).unwrap_or(true),
        check_more: header_flag(headers, HEADER_CHECK_MORE).unwrap_or(false),
    })
}

#[async_trait::async_trait]
impl WalSource for ArangoWalSource {
    async fn check_collection(&self, collection: &str) -> Result<CollectionInfo, SourceError> {
        let url = self.url(&["_api", "collection", collection, "properties"]);
        let response = self
            .send(
                self.request(Method::GET, url)?,
                &format!("Reading collection '{collection}'"),
            )
            .await?;

        let body: Value = response.json().await?;
        let info = CollectionInfo {
            name: collection.to_string(),
            id: body.get("id").and_then(Value::as_str).map(str::to_string),
            globally_unique_id: body
                .get("globallyUniqueId")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        tracing::debug!("Resolved collection {:?}", info);
        Ok(info)
    }

    async fn tail(&self, from: &Tick) -> Result<TailBatch, SourceError> {
        let mut url = self.url(&["_api", "wal", "tail"]);
        url.query_pairs_mut()
            .append_pair("from", from.as_str())
            .append_pair("chunkSize", &self.opts.chunk_size.to_string());

        let response = self
            .send(self.request(Method::GET, url)?, "Tailing WAL")
            .await?;

        let headers = response.headers().clone();
        if response.status() == StatusCode::NO_CONTENT {
            return parse_tail(&headers, "");
        }
        let body = response.text().await?;
        parse_tail(&headers, &body)
    }

    async fn current_tick(&self) -> Result<Tick, SourceError> {
        let url = self.url(&["_api", "replication", "logger-state"]);
        let response = self
            .send(self.request(Method::GET, url)?, "Reading logger state")
            .await?;

        let body: Value = response.json().await?;
        body.get("state")
            .and_then(|state| state.get("lastLogTick"))
            .and_then(|tick| match tick {
                Value::String(s) => Some(Tick::new(s.clone())),
                Value::Number(n) => Some(Tick::new(n.to_string())),
                _ => None,
            })
            .ok_or_else(|| SourceError::Fatal("Logger state has no lastLogTick".to_string()))
    }

    async fn open_scan(
        &self,
        collection: &str,
        batch_size: usize,
    ) -> Result<ScanPage, SourceError> {
        let body = json!({
            "query": "FOR d IN @@collection RETURN d",
            "bindVars": { "@collection": collection },
            "batchSize": batch_size,
        });
        let response = self
            .send(
                self.request(Method::POST, self.url(&["_api", "cursor"]))?
                    .json(&body),
                &format!("Scanning collection '{collection}'"),
            )
            .await?;
        self.parse_page(response).await
    }

    async fn next_scan_page(&self, cursor: &str) -> Result<ScanPage, SourceError> {
        self.cursors.lock().await.remove(cursor);
        let response = self
            .send(
                self.request(Method::PUT, self.url(&["_api", "cursor", cursor]))?,
                &format!("Reading cursor {cursor}"),
            )
            .await?;
        self.parse_page(response).await
    }

    async fn close_scan(&self, cursor: &str) -> Result<(), SourceError> {
        self.cursors.lock().await.remove(cursor);
        let response = self
            .request(Method::DELETE, self.url(&["_api", "cursor", cursor]))?
            .send()
            .await?;
        // The server drops exhausted or expired cursors on its own.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(self
            .classify_failure(response, &format!("Closing cursor {cursor}"))
            .await)
    }

    async fn close(&self) {
        let open: Vec<String> = self.cursors.lock().await.drain().collect();
        for cursor in open {
            if let Err(e) = self.close_scan(&cursor).await {
                tracing::warn!("Failed to close cursor {cursor}: {e}");
            }
        }
        self.closed.store(true, Ordering::Release);
        tracing::debug!("ArangoDB source closed");
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_parse_tail_response() {
        let body = concat!(
            r#"{"tick":"101","type":2300,"cname":"orders","data":{"_key":"a"}}"#,
            "\n",
            r#"{"tick":"102","type":2302,"cname":"orders","data":{"_key":"a"}}"#,
            "\n"
        );
        let batch = parse_tail(
            &headers(&[
                (HEADER_LAST_INCLUDED, "102"),
                (HEADER_CHECK_MORE, "true"),
                (HEADER_FROM_PRESENT, "true"),
            ]),
            body,
        )
        .unwrap();

        assert_eq!(batch.entries.len(), 2);
        assert_eq!(batch.entries[1].tick, Tick::from("102"));
        assert_eq!(batch.last_included, Some(Tick::from("102")));
        assert!(batch.check_more);
        assert!(batch.from_present);
    }

    #[test]
    fn test_parse_empty_tail_response() {
        let batch = parse_tail(
            &headers(&[
                (HEADER_LAST_INCLUDED, "0"),
                (HEADER_CHECK_MORE, "false"),
                (HEADER_FROM_PRESENT, "false"),
            ]),
            "",
        )
        .unwrap();

        assert!(batch.entries.is_empty());
        assert_eq!(batch.last_included, None);
        assert!(!batch.check_more);
        assert!(!batch.from_present);
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let err = parse_tail(&HeaderMap::new(), "{not json}\n").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_urls_are_database_scoped() {
        let source = ArangoWalSource::new(ArangoOpts {
            host: "arango.local".to_string(),
            database: "shop".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            source.url(&["_api", "wal", "tail"]).as_str(),
            "http://arango.local:8529/_db/shop/_api/wal/tail"
        );
        assert_eq!(
            source.url(&["_api", "collection", "my orders", "properties"]).as_str(),
            "http://arango.local:8529/_db/shop/_api/collection/my%20orders/properties"
        );
    }

    #[test]
    fn test_base_url_keeps_scheme_and_port() {
        let url = |host: &str| base_url(host, 8529).map(|u| u.to_string());

        assert_eq!(url("arango.local").unwrap(), "http://arango.local:8529/");
        assert_eq!(url("http://arango.local/").unwrap(), "http://arango.local:8529/");
        assert_eq!(url("https://arango.local").unwrap(), "https://arango.local:8529/");
        assert_eq!(url("https://arango.local:9443").unwrap(), "https://arango.local:9443/");
        assert!(url("ftp://arango.local").is_err());
        assert!(url("https://arango.local/db").is_err());
    }

    #[test]
    fn test_https_source_urls() {
        let source = ArangoWalSource::new(ArangoOpts {
            host: "https://arango.local".to_string(),
            database: "shop".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            source.url(&["_api", "wal", "tail"]).as_str(),
            "https://arango.local:8529/_db/shop/_api/wal/tail"
        );
    }

    #[tokio::test]
    async fn test_closed_source_refuses_requests() {
        let source = ArangoWalSource::new(ArangoOpts::default()).unwrap();
        source.close().await;
        let err = source.tail(&Tick::origin()).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
