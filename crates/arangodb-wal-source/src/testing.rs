//! In-memory WAL for tests.
//!
//! `MemoryWal` keeps a collection map plus an append-only log with numeric
//! ticks, so tests can write documents, purge history and inject failures
//! without a running ArangoDB.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde_json::Value;
use sync_core::{Document, Tick};
use tokio::sync::Mutex;

use crate::{CollectionInfo, ScanPage, SourceError, TailBatch, WalEntry, WalSource};

#[derive(Debug)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Document>>,
    log: Vec<WalEntry>,
    last_tick: u64,
    /// Ticks up to and including this one are gone.
    purged_through: u64,
    chunk: usize,
    failures: VecDeque<SourceError>,
    polls: usize,
    cursors: HashMap<String, (VecDeque<Document>, usize)>,
    next_cursor: u64,
    closed: bool,
}

#[derive(Debug)]
pub struct MemoryWal {
    inner: Mutex<Inner>,
}

impl Default for MemoryWal {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric(tick: &Tick) -> u64 {
    tick.as_str().parse().unwrap_or(0)
}

impl MemoryWal {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                collections: HashMap::new(),
                log: Vec::new(),
                last_tick: 0,
                purged_through: 0,
                chunk: 1000,
                failures: VecDeque::new(),
                polls: 0,
                cursors: HashMap::new(),
                next_cursor: 0,
                closed: false,
            }),
        }
    }

    /// Maximum number of markers returned by one tail call.
    pub async fn set_chunk_size(&self, chunk: usize) {
        self.inner.lock().await.chunk = chunk.max(1);
    }

    pub async fn create_collection(&self, name: &str) {
        self.inner
            .lock()
            .await
            .collections
            .entry(name.to_string())
            .or_default();
    }

    pub async fn insert(&self, collection: &str, key: &str, document: Document) -> Tick {
        self.write(collection, key, document, false).await
    }

    pub async fn update(&self, collection: &str, key: &str, document: Document) -> Tick {
        self.write(collection, key, document, true).await
    }

    async fn write(&self, collection: &str, key: &str, mut document: Document, update: bool) -> Tick {
        let mut inner = self.inner.lock().await;
        inner.last_tick += 1;
        let tick = Tick::from(inner.last_tick);

        document.insert("_key".to_string(), Value::String(key.to_string()));
        document.insert(
            "_id".to_string(),
            Value::String(format!("{collection}/{key}")),
        );
        document.insert("_rev".to_string(), Value::String(format!("_r{tick}")));

        let previous = inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), document.clone());

        let mut entry = WalEntry::document(tick.clone(), collection, document);
        if update {
            entry.old_rev = Some(
                previous
                    .and_then(|doc| doc.get("_rev").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_default(),
            );
        }
        inner.log.push(entry);
        tick
    }

    pub async fn remove(&self, collection: &str, key: &str) -> Tick {
        let mut inner = self.inner.lock().await;
        inner.last_tick += 1;
        let tick = Tick::from(inner.last_tick);
        if let Some(docs) = inner.collections.get_mut(collection) {
            docs.remove(key);
        }
        inner.log.push(WalEntry::remove(tick.clone(), collection, key));
        tick
    }

    /// Append a raw marker with the next tick.
    pub async fn append_marker(&self, marker_type: u32, collection: &str) -> Tick {
        let mut inner = self.inner.lock().await;
        inner.last_tick += 1;
        let tick = Tick::from(inner.last_tick);
        inner
            .log
            .push(WalEntry::collection_marker(tick.clone(), marker_type, collection));
        tick
    }

    /// Drop history up to and including `tick`.
    pub async fn purge_through(&self, tick: Tick) {
        let mut inner = self.inner.lock().await;
        let through = numeric(&tick);
        inner.purged_through = through;
        inner.log.retain(|entry| numeric(&entry.tick) > through);
    }

    /// Fail the next tail calls, in order, with these errors.
    pub async fn fail_next_polls(&self, errors: impl IntoIterator<Item = SourceError>) {
        self.inner.lock().await.failures.extend(errors);
    }

    /// Number of tail calls so far, failed ones included.
    pub async fn polls(&self) -> usize {
        self.inner.lock().await.polls
    }

    pub async fn last_tick(&self) -> Tick {
        Tick::from(self.inner.lock().await.last_tick)
    }

    pub async fn open_cursors(&self) -> usize {
        self.inner.lock().await.cursors.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.closed {
            return Err(SourceError::Fatal("source connection closed".to_string()));
        }
        Ok(())
    }

    fn next_page(&mut self, cursor: String) -> ScanPage {
        let Some((remaining, batch_size)) = self.cursors.get_mut(&cursor) else {
            return ScanPage::default();
        };
        let take = (*batch_size).min(remaining.len());
        let documents: Vec<Document> = remaining.drain(..take).collect();
        if remaining.is_empty() {
            self.cursors.remove(&cursor);
            return ScanPage {
                documents,
                cursor: None,
            };
        }
        ScanPage {
            documents,
            cursor: Some(cursor),
        }
    }
}

#[async_trait::async_trait]
impl WalSource for MemoryWal {
    async fn check_collection(&self, collection: &str) -> Result<CollectionInfo, SourceError> {
        let inner = self.inner.lock().await;
        inner.ensure_open()?;
        if inner.collections.contains_key(collection) {
            Ok(CollectionInfo::named(collection))
        } else {
            Err(SourceError::Fatal(format!(
                "Reading collection '{collection}': collection not found"
            )))
        }
    }

    async fn tail(&self, from: &Tick) -> Result<TailBatch, SourceError> {
        let mut inner = self.inner.lock().await;
        inner.polls += 1;
        if let Some(error) = inner.failures.pop_front() {
            return Err(error);
        }
        inner.ensure_open()?;

        let from_tick = numeric(from);
        let pending: Vec<&WalEntry> = inner
            .log
            .iter()
            .filter(|entry| numeric(&entry.tick) > from_tick)
            .collect();
        let check_more = pending.len() > inner.chunk;
        let entries: Vec<WalEntry> = pending.into_iter().take(inner.chunk).cloned().collect();

        Ok(TailBatch {
            last_included: entries.last().map(|entry| entry.tick.clone()),
            entries,
            from_present: from_tick >= inner.purged_through,
            check_more,
        })
    }

    async fn current_tick(&self) -> Result<Tick, SourceError> {
        let inner = self.inner.lock().await;
        inner.ensure_open()?;
        Ok(Tick::from(inner.last_tick))
    }

    async fn open_scan(
        &self,
        collection: &str,
        batch_size: usize,
    ) -> Result<ScanPage, SourceError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        let documents: VecDeque<Document> = inner
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .ok_or_else(|| SourceError::Fatal(format!("collection '{collection}' not found")))?;

        inner.next_cursor += 1;
        let cursor = format!("cursor-{}", inner.next_cursor);
        inner
            .cursors
            .insert(cursor.clone(), (documents, batch_size.max(1)));
        Ok(inner.next_page(cursor))
    }

    async fn next_scan_page(&self, cursor: &str) -> Result<ScanPage, SourceError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_open()?;
        if !inner.cursors.contains_key(cursor) {
            return Err(SourceError::Fatal(format!("cursor {cursor} not found")));
        }
        Ok(inner.next_page(cursor.to_string()))
    }

    async fn close_scan(&self, cursor: &str) -> Result<(), SourceError> {
        self.inner.lock().await.cursors.remove(cursor);
        Ok(())
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.cursors.clear();
        inner.closed = true;
    }
}
