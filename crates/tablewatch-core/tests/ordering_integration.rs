//! Ordering and subscribe-during-dispatch tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::BufReader;

use tablewatch_core::{
    channel, start_pump, ChangeEvent, ChangeKind, HubConfig, JsonLinesSource, Notification,
    NotificationHub, Row, StopReason, Subscriber, SubscriberError,
};

#[derive(Default)]
struct Recorder {
    snapshot: Mutex<Option<Vec<Row>>>,
    changes: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Subscriber for Recorder {
    async fn on_snapshot(&self, rows: &[Row]) -> Result<(), SubscriberError> {
        let mut snapshot = self.snapshot.lock();
        assert!(snapshot.is_none(), "snapshot delivered twice");
        *snapshot = Some(rows.to_vec());
        Ok(())
    }

    async fn on_change(&self, notification: &Notification) -> Result<(), SubscriberError> {
        assert!(
            self.snapshot.lock().is_some(),
            "notification delivered before the snapshot"
        );
        self.changes.lock().push(notification.clone());
        tokio::task::yield_now().await;
        Ok(())
    }
}

impl Recorder {
    /// Replay the recorded notifications onto the initial snapshot.
    fn replay(&self) -> BTreeMap<String, Row> {
        let mut rows: BTreeMap<String, Row> = self
            .snapshot
            .lock()
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|row| (row.key().to_string(), row))
            .collect();

        for n in self.changes.lock().iter() {
            match n.kind {
                ChangeKind::Deleted => {
                    assert!(rows.remove(&n.key).is_some(), "delete of unseen row {}", n.key);
                }
                ChangeKind::Inserted => {
                    assert!(!rows.contains_key(&n.key), "duplicate insert of {}", n.key);
                    rows.insert(n.key.clone(), n.new_row.clone().unwrap());
                }
                ChangeKind::Updated => {
                    assert_eq!(rows.get(&n.key), n.old_row.as_ref(), "stale update of {}", n.key);
                    rows.insert(n.key.clone(), n.new_row.clone().unwrap());
                }
            }
        }
        rows
    }
}

fn city(key: &str, temp: i64) -> Row {
    Row::new(key).with_field("temp", temp)
}

fn workload(keys: &[&str], rounds: i64) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for round in 0..rounds {
        for key in keys {
            events.push(ChangeEvent::inserted(city(key, round)));
            events.push(ChangeEvent::updated(None, city(key, round + 100)));
            if round % 3 == 2 {
                events.push(ChangeEvent::deleted(*key, None));
            }
        }
    }
    events
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_subscribers_see_every_transition_exactly_once() {
    let hub = Arc::new(NotificationHub::new(
        HubConfig::new().with_delivery_timeout(Duration::from_secs(10)),
    ));

    // Two producers on disjoint keys, racing each other and the subscribers.
    let producers: Vec<_> = [vec!["Rome", "Oslo"], vec!["Lima", "Kyiv"]]
        .into_iter()
        .map(|keys| {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for event in workload(&keys, 30) {
                    hub.on_source_event(event).await.unwrap();
                }
            })
        })
        .collect();

    let mut recorders = Vec::new();
    for i in 0..8 {
        let recorder = Arc::new(Recorder::default());
        let id = hub
            .subscribe(&format!("session-{i}"), recorder.clone())
            .await
            .unwrap();
        recorders.push((id, recorder));
        tokio::task::yield_now().await;
    }

    for producer in producers {
        producer.await.unwrap();
    }

    let expected: BTreeMap<String, Row> = hub
        .snapshot()
        .unwrap()
        .into_iter()
        .map(|row| (row.key().to_string(), row))
        .collect();
    let final_version = hub.version();

    for (id, recorder) in &recorders {
        assert_eq!(recorder.replay(), expected, "replay diverged for {id}");

        let start = hub.subscriptions().iter().find(|s| s.id == *id).unwrap().start_version;
        let versions: Vec<u64> = recorder.changes.lock().iter().map(|n| n.version).collect();
        let unique: BTreeSet<u64> = versions.iter().copied().collect();
        assert_eq!(unique.len(), versions.len(), "duplicate notification for {id}");
        assert_eq!(unique, (start + 1..=final_version).collect::<BTreeSet<u64>>());
    }
}

#[tokio::test]
async fn test_update_after_insert_is_never_dropped() {
    let hub = Arc::new(NotificationHub::new(HubConfig::default()));
    let recorder = Arc::new(Recorder::default());
    hub.subscribe("session", recorder.clone()).await.unwrap();

    let (handle, source) = channel(64);
    let pump = start_pump(Arc::clone(&hub), source, None);

    handle.send(ChangeEvent::inserted(city("Rome", 20))).await.unwrap();
    // Redelivered insert between the insert and the update.
    handle.send(ChangeEvent::inserted(city("Rome", 20))).await.unwrap();
    handle.send(ChangeEvent::updated(Some(city("Rome", 20)), city("Rome", 25))).await.unwrap();
    drop(handle);

    let report = pump.await.unwrap();
    assert_eq!(report.stop, StopReason::EndOfFeed);
    assert_eq!(hub.get("Rome"), Some(city("Rome", 25)));

    let temps: Vec<i64> = recorder
        .changes
        .lock()
        .iter()
        .map(|n| n.new_row.as_ref().and_then(|r| r.get("temp")).and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(temps, vec![20, 25]);
}

#[tokio::test]
async fn test_json_feed_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weather.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"kind":"inserted","new":{"key":"Rome","fields":{"temp":20}}}"#, "\n",
            r#"{"kind":"inserted","new":{"key":"Oslo","fields":{"temp":-3}}}"#, "\n",
            r#"{"kind":"updated","key":"Rome","new":{"key":"Rome","fields":{"temp":25}},"old":{"key":"Rome","fields":{"temp":20}}}"#, "\n",
            r#"{"kind":"deleted","key":"Lima"}"#, "\n",
            r#"{"kind":"updated"}"#, "\n",
        ),
    )
    .unwrap();

    let file = tokio::fs::File::open(&path).await.unwrap();
    let source = JsonLinesSource::new(BufReader::new(file), "weather.jsonl");
    let hub = Arc::new(NotificationHub::new(HubConfig::default()));

    let report = start_pump(Arc::clone(&hub), source, None).await.unwrap();
    assert_eq!(report.received, 5);
    assert_eq!(report.changed, 3);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.rejected, 1);

    assert_eq!(hub.snapshot().unwrap(), vec![city("Rome", 25), city("Oslo", -3)]);
}
