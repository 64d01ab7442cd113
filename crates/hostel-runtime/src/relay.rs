//! Relays a table's change feed into a shared [`LiveList`].
//!
//! Each subscription runs as its own task, so a stalled or failed table
//! never holds up another. The returned [`Subscription`] is the only way to
//! stop it; dropping the handle stops it too.

use std::sync::Arc;

use hostel_core::error::{HostelError, Result};
use hostel_core::models::Identified;
use hostel_data::realtime::{ChangeFeed, ChangeKind, RawChange};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::live_list::LiveList;

/// A list shared between a relay task and its readers.
pub type SharedList<T> = Arc<RwLock<LiveList<T>>>;

/// A decoded row change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    Delete { id: String },
}

impl<T: DeserializeOwned> ChangeEvent<T> {
    /// Decode the row carried by `raw`. Deletes only need the old row's id.
    pub fn decode(raw: RawChange) -> Result<Self> {
        match raw.kind {
            ChangeKind::Insert => Ok(Self::Insert(decode_row(raw.new, raw.kind)?)),
            ChangeKind::Update => Ok(Self::Update(decode_row(raw.new, raw.kind)?)),
            ChangeKind::Delete => {
                let id = raw
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(id_text)
                    .ok_or_else(|| {
                        HostelError::Realtime(format!("DELETE on {} without an old id", raw.table))
                    })?;
                Ok(Self::Delete { id })
            }
        }
    }
}

fn decode_row<T: DeserializeOwned>(row: Option<Value>, kind: ChangeKind) -> Result<T> {
    let row = row.ok_or_else(|| HostelError::Realtime(format!("{kind} without a new row")))?;
    Ok(serde_json::from_value(row)?)
}

fn id_text(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Subscription ──────────────────────────────────────────────────────────────

/// Handle to a running relay.
pub struct Subscription {
    table: String,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// `false` once the feed has ended or the relay was stopped.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop relaying. The feed's stream is released with the task.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(table = %self.table, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open `table` on `feed` and apply every change to `list`.
///
/// `on_applied` runs after each change that altered the list, with the
/// list's write lock already released. Undecodable changes are logged and
/// skipped.
pub async fn subscribe<T, F>(
    feed: &dyn ChangeFeed,
    table: &str,
    list: SharedList<T>,
    on_applied: F,
) -> Result<Subscription>
where
    T: Identified + DeserializeOwned + Send + Sync + 'static,
    F: Fn(ChangeKind) + Send + Sync + 'static,
{
    let mut stream = feed.open(table).await?;
    let name = table.to_string();
    tracing::info!(table = %name, "subscribed to changes");

    let task = tokio::spawn(async move {
        while let Some(raw) = stream.next().await {
            let kind = raw.kind;
            let event = match ChangeEvent::<T>::decode(raw) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(table = %name, %kind, error = %e, "skipping undecodable change");
                    continue;
                }
            };
            let changed = list.write().await.apply(event);
            if changed {
                on_applied(kind);
            } else {
                tracing::debug!(table = %name, %kind, "change did not affect the list");
            }
        }
        tracing::warn!(table = %name, "change feed ended");
    });

    Ok(Subscription {
        table: table.to_string(),
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeFeed;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Row {
        id: String,
        label: String,
    }

    impl Identified for Row {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn shared(rows: Vec<Row>, capacity: Option<usize>) -> SharedList<Row> {
        let list = match capacity {
            Some(cap) => LiveList::bounded(rows, cap),
            None => LiveList::new(rows),
        };
        Arc::new(RwLock::new(list))
    }

    async fn labels(list: &SharedList<Row>) -> Vec<String> {
        list.read()
            .await
            .items()
            .iter()
            .map(|r| r.label.clone())
            .collect()
    }

    /// Let the relay task drain what was emitted.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ── decode ──

    #[test]
    fn test_decode_delete_takes_old_id() {
        let raw = RawChange {
            table: "alerts".to_string(),
            kind: ChangeKind::Delete,
            new: None,
            old: Some(json!({ "id": 42 })),
        };
        let event = ChangeEvent::<Row>::decode(raw).unwrap();
        assert_eq!(event, ChangeEvent::Delete { id: "42".to_string() });
    }

    #[test]
    fn test_decode_insert_without_row_fails() {
        let raw = RawChange {
            table: "alerts".to_string(),
            kind: ChangeKind::Insert,
            new: None,
            old: None,
        };
        assert!(matches!(
            ChangeEvent::<Row>::decode(raw),
            Err(HostelError::Realtime(_))
        ));
    }

    // ── relay ──

    #[tokio::test]
    async fn test_changes_are_applied_in_order() {
        let feed = FakeFeed::new();
        let list = shared(vec![Row { id: "1".into(), label: "one".into() }], Some(2));
        let applied = Arc::new(AtomicUsize::new(0));
        let counter = applied.clone();
        let _sub = subscribe(feed.as_ref(), "entry_logs", list.clone(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        let insert = |id: &str, label: &str| Some(json!({ "id": id, "label": label }));
        feed.emit("entry_logs", ChangeKind::Insert, insert("2", "two"), None).await;
        feed.emit("entry_logs", ChangeKind::Insert, insert("3", "three"), None).await;
        feed.emit("entry_logs", ChangeKind::Update, insert("9", "ghost"), None).await;
        feed.emit("entry_logs", ChangeKind::Update, insert("2", "TWO"), None).await;
        settle().await;

        assert_eq!(labels(&list).await, ["three", "TWO"]);
        assert_eq!(applied.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_undecodable_change_is_skipped() {
        let feed = FakeFeed::new();
        let list = shared(Vec::new(), None);
        let _sub = subscribe(feed.as_ref(), "alerts", list.clone(), |_| {})
            .await
            .unwrap();

        feed.emit("alerts", ChangeKind::Insert, Some(json!({ "bogus": true })), None).await;
        feed.emit("alerts", ChangeKind::Insert, Some(json!({ "id": "a", "label": "ok" })), None).await;
        settle().await;

        assert_eq!(labels(&list).await, ["ok"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_the_feed() {
        let feed = FakeFeed::new();
        let list = shared(Vec::new(), None);
        let sub = subscribe(feed.as_ref(), "students", list.clone(), |_| {})
            .await
            .unwrap();
        assert!(sub.is_active());
        assert!(!feed.is_closed("students"));

        sub.unsubscribe();
        settle().await;
        assert!(feed.is_closed("students"));

        feed.emit("students", ChangeKind::Insert, Some(json!({ "id": "a", "label": "late" })), None).await;
        settle().await;
        assert!(list.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_open_is_reported() {
        let feed = FakeFeed::new();
        feed.fail_tables.lock().unwrap().push("alerts".to_string());
        let result = subscribe(feed.as_ref(), "alerts", shared(Vec::new(), None), |_| {}).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_table_does_not_block_another() {
        let feed = FakeFeed::new();
        let students = shared(Vec::new(), None);
        let alerts = shared(Vec::new(), None);
        let _a = subscribe(feed.as_ref(), "students", students.clone(), |_| {})
            .await
            .unwrap();
        let _b = subscribe(feed.as_ref(), "alerts", alerts.clone(), |_| {})
            .await
            .unwrap();

        // Hold the students list so its relay is stuck on the lock.
        let guard = students.write().await;
        feed.emit("students", ChangeKind::Insert, Some(json!({ "id": "s", "label": "s" })), None).await;
        feed.emit("alerts", ChangeKind::Insert, Some(json!({ "id": "a", "label": "a" })), None).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(labels(&alerts).await, ["a"]);
        drop(guard);
        settle().await;
        assert_eq!(labels(&students).await, ["s"]);
    }
}
