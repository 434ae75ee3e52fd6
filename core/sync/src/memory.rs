//! In-memory remote gateway for testing and local development.
//!
//! Behaves like a real document service: ETag checks on push, server
//! tombstones, a monotonic clock and scope filtering. Latency and one-shot
//! failures can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use offcache_common::{BucketName, Error, ObjectId, Result};
use offcache_query::{Clause, Filter};

use crate::gateway::{PullBatch, PushDocument, PushOutcome, RemoteGateway, RemoteObject};

#[derive(Debug, Default)]
struct Server {
    buckets: HashMap<BucketName, HashMap<ObjectId, RemoteObject>>,
    clock: i64,
    fail_next: Option<(u16, Option<Value>)>,
    fail_push: Option<(u16, Option<Value>)>,
}

impl Server {
    /// Advance the clock, never going backwards.
    fn tick(&mut self) -> i64 {
        self.clock = chrono::Utc::now().timestamp_millis().max(self.clock + 1);
        self.clock
    }

    fn take_failure(&mut self, pushing: bool) -> Result<()> {
        let injected = if pushing {
            self.fail_push.take().or_else(|| self.fail_next.take())
        } else {
            self.fail_next.take()
        };
        match injected {
            Some((status, body)) => Err(Error::Remote { status, body }),
            None => Ok(()),
        }
    }

    fn write(&mut self, bucket: &BucketName, id: &ObjectId, payload: Value, deleted: bool) -> RemoteObject {
        let updated_at = self.tick();
        let object = RemoteObject {
            id: id.clone(),
            payload,
            etag: Uuid::new_v4().simple().to_string(),
            updated_at,
            deleted,
        };
        self.buckets
            .entry(bucket.clone())
            .or_default()
            .insert(id.clone(), object.clone());
        object
    }
}

/// In-memory [`RemoteGateway`].
#[derive(Debug, Default)]
pub struct MemoryGateway {
    server: Mutex<Server>,
    latency: Duration,
    pulls: AtomicUsize,
    pushes: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every pull and push by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next pull or push fail with `status`.
    pub async fn fail_next(&self, status: u16, body: Option<Value>) {
        self.server.lock().await.fail_next = Some((status, body));
    }

    /// Make the next push fail with `status`; pulls are unaffected.
    pub async fn fail_next_push(&self, status: u16, body: Option<Value>) {
        self.server.lock().await.fail_push = Some((status, body));
    }

    /// Write a document as another client would.
    pub async fn put_server(&self, bucket: &BucketName, id: &ObjectId, payload: Value) -> RemoteObject {
        self.server.lock().await.write(bucket, id, payload, false)
    }

    /// Tombstone a document server-side. Returns `None` if it does not exist.
    pub async fn delete_server(&self, bucket: &BucketName, id: &ObjectId) -> Option<RemoteObject> {
        let mut server = self.server.lock().await;
        let previous = server.buckets.get(bucket)?.get(id)?.payload.clone();
        Some(server.write(bucket, id, previous, true))
    }

    pub async fn get_server(&self, bucket: &BucketName, id: &ObjectId) -> Option<RemoteObject> {
        let server = self.server.lock().await;
        server.buckets.get(bucket)?.get(id).cloned()
    }

    /// Live (non-tombstoned) server documents of `bucket`.
    pub async fn server_objects(&self, bucket: &BucketName) -> Vec<RemoteObject> {
        let server = self.server.lock().await;
        let mut objects: Vec<RemoteObject> = server
            .buckets
            .get(bucket)
            .map(|docs| docs.values().filter(|o| !o.deleted).cloned().collect())
            .unwrap_or_default();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        objects
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn pull(
        &self,
        bucket: &BucketName,
        since: Option<i64>,
        filter: Option<&Clause>,
    ) -> Result<PullBatch> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let compiled = filter.map(Filter::compile);
        self.delay().await;

        let mut server = self.server.lock().await;
        server.take_failure(false)?;
        let mut objects: Vec<RemoteObject> = server
            .buckets
            .get(bucket)
            .map(|docs| {
                docs.values()
                    .filter(|o| since.map_or(true, |t| o.updated_at > t))
                    .filter(|o| compiled.as_ref().map_or(true, |f| f.matches(&o.payload)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        objects.sort_by_key(|o| o.updated_at);

        debug!("Memory gateway pull of {}: {} objects", bucket, objects.len());
        Ok(PullBatch {
            objects,
            server_time: server.clock,
        })
    }

    async fn push(&self, bucket: &BucketName, documents: Vec<PushDocument>) -> Result<Vec<PushOutcome>> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut server = self.server.lock().await;
        server.take_failure(true)?;

        let mut outcomes = Vec::with_capacity(documents.len());
        for doc in documents {
            let current = server
                .buckets
                .get(bucket)
                .and_then(|docs| docs.get(&doc.id))
                .cloned();
            if let Some(current) = current {
                if doc.base_etag.as_deref() != Some(current.etag.as_str()) {
                    outcomes.push(PushOutcome::Conflict {
                        id: doc.id,
                        remote: current,
                    });
                    continue;
                }
            }
            let stored = server.write(bucket, &doc.id, doc.payload, doc.deleted);
            outcomes.push(PushOutcome::Acked {
                id: stored.id,
                etag: stored.etag,
                updated_at: stored.updated_at,
            });
        }
        debug!("Memory gateway push to {}: {} outcomes", bucket, outcomes.len());
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notes() -> BucketName {
        BucketName::new("notes").unwrap()
    }

    fn id(s: &str) -> ObjectId {
        ObjectId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_pull_since() {
        let gateway = MemoryGateway::new();
        gateway.put_server(&notes(), &id("a"), json!({"n": 1})).await;
        let first = gateway.pull(&notes(), None, None).await.unwrap();
        assert_eq!(first.objects.len(), 1);

        gateway.put_server(&notes(), &id("b"), json!({"n": 2})).await;
        let second = gateway
            .pull(&notes(), Some(first.server_time), None)
            .await
            .unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].id, id("b"));
        assert!(second.server_time > first.server_time);
    }

    #[tokio::test]
    async fn test_pull_filter() {
        let gateway = MemoryGateway::new();
        gateway.put_server(&notes(), &id("a"), json!({"n": 1})).await;
        gateway.put_server(&notes(), &id("b"), json!({"n": 5})).await;
        let batch = gateway
            .pull(&notes(), None, Some(&Clause::gt("n", 2)))
            .await
            .unwrap();
        assert_eq!(batch.objects.len(), 1);
        assert_eq!(batch.objects[0].id, id("b"));
    }

    #[tokio::test]
    async fn test_push_etag_check() {
        let gateway = MemoryGateway::new();
        let remote = gateway.put_server(&notes(), &id("a"), json!({"n": 1})).await;

        let outcomes = gateway
            .push(
                &notes(),
                vec![PushDocument {
                    id: id("a"),
                    payload: json!({"n": 2}),
                    base_etag: Some("stale".into()),
                    deleted: false,
                }],
            )
            .await
            .unwrap();
        assert!(matches!(&outcomes[0], PushOutcome::Conflict { remote: r, .. } if r == &remote));

        let outcomes = gateway
            .push(
                &notes(),
                vec![PushDocument {
                    id: id("a"),
                    payload: json!({"n": 2}),
                    base_etag: Some(remote.etag.clone()),
                    deleted: false,
                }],
            )
            .await
            .unwrap();
        assert!(matches!(outcomes[0], PushOutcome::Acked { .. }));
        let stored = gateway.get_server(&notes(), &id("a")).await.unwrap();
        assert_eq!(stored.payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_delete_keeps_tombstone() {
        let gateway = MemoryGateway::new();
        gateway.put_server(&notes(), &id("a"), json!({"n": 1})).await;
        gateway.delete_server(&notes(), &id("a")).await.unwrap();

        assert!(gateway.server_objects(&notes()).await.is_empty());
        let batch = gateway.pull(&notes(), None, None).await.unwrap();
        assert!(batch.objects[0].deleted);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let gateway = MemoryGateway::new();
        gateway.fail_next(503, Some(json!({"error": "down"}))).await;

        let err = gateway.pull(&notes(), None, None).await.unwrap_err();
        assert_eq!(err.remote_status(), Some(503));
        assert!(gateway.pull(&notes(), None, None).await.is_ok());
    }
}
