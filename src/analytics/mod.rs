//! Local usage analytics: query volume, coarse topic interest and a rolling
//! success rate, persisted as one versioned snapshot.

pub mod store;
pub mod topics;

use async_trait::async_trait;
use chrono::{ Datelike, Local, Weekday };
use log::{ info, warn };
use serde::{ Deserialize, Serialize };
use std::sync::Arc;
use tokio::sync::{ broadcast, Mutex };

use self::store::SnapshotStore;
use self::topics::detect_topics;
use crate::agent::TurnObserver;

const SUCCESS_STEP: f64 = 0.1;
const FAILURE_STEP: f64 = 0.5;
const SIGNAL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayVolume {
    pub day_label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub total_queries: u64,
    /// Percentage in `[0, 100]`, one decimal place.
    pub success_rate: f64,
    pub topic_counts: Vec<TopicCount>,
    /// Seven weekday buckets, `Mon` first.
    pub daily_volume: Vec<DayVolume>,
}

fn topic(label: &str, count: u64) -> TopicCount {
    TopicCount { topic: label.to_string(), count }
}

fn day(label: &str, count: u64) -> DayVolume {
    DayVolume { day_label: label.to_string(), count }
}

impl UsageSnapshot {
    /// State used on first run and after a reset.
    pub fn seed() -> Self {
        Self {
            total_queries: 1240,
            success_rate: 94.2,
            topic_counts: vec![
                topic("COMP 210 Advice", 450),
                topic("Housing Lottery", 320),
                topic("Study Abroad", 210),
                topic("Dining Hall Hours", 180),
                topic("Career Peer Mentors", 80)
            ],
            daily_volume: vec![
                day("Mon", 120),
                day("Tue", 150),
                day("Wed", 180),
                day("Thu", 210),
                day("Fri", 190),
                day("Sat", 90),
                day("Sun", 100)
            ],
        }
    }

    pub fn topic_count(&self, label: &str) -> Option<u64> {
        self.topic_counts
            .iter()
            .find(|t| t.topic == label)
            .map(|t| t.count)
    }

    pub fn day_count(&self, label: &str) -> Option<u64> {
        self.daily_volume
            .iter()
            .find(|d| d.day_label == label)
            .map(|d| d.count)
    }
}

pub fn day_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Change notifications for views that render the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsSignal {
    Changed,
    /// The snapshot was reset; dependent views must reload from scratch.
    ReloadRequired,
}

pub struct UsageAggregator {
    snapshot: UsageSnapshot,
    store: Arc<dyn SnapshotStore>,
    signal: broadcast::Sender<AnalyticsSignal>,
}

pub type SharedAggregator = Arc<Mutex<UsageAggregator>>;

impl UsageAggregator {
    /// Restores the persisted snapshot, falling back to seed defaults when the
    /// record is absent or unreadable.
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        let snapshot = match store.load() {
            Ok(Some(text)) =>
                match store::decode(&text) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!("Discarding unreadable analytics snapshot: {}", e);
                        UsageSnapshot::seed()
                    }
                }
            Ok(None) => {
                info!("No analytics snapshot stored yet; starting from seed defaults");
                UsageSnapshot::seed()
            }
            Err(e) => {
                warn!("Analytics storage unavailable, starting from seed defaults: {}", e);
                UsageSnapshot::seed()
            }
        };
        let (signal, _) = broadcast::channel(SIGNAL_CAPACITY);

        Self { snapshot, store, signal }
    }

    pub fn shared(self) -> SharedAggregator {
        Arc::new(Mutex::new(self))
    }

    /// Every open WebSocket connection listens here and relays `ReloadRequired` to its client.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalyticsSignal> {
        self.signal.subscribe()
    }

    /// Read-only view of the current in-memory snapshot.
    pub fn snapshot(&self) -> &UsageSnapshot {
        &self.snapshot
    }

    pub fn record_submission(&mut self, query: &str) {
        self.record_submission_on(query, Local::now().weekday());
    }

    pub fn record_submission_on(&mut self, query: &str, weekday: Weekday) {
        self.snapshot.total_queries += 1;

        for label in detect_topics(query) {
            match self.snapshot.topic_counts.iter_mut().find(|t| t.topic == label) {
                Some(existing) => {
                    existing.count += 1;
                }
                None => self.snapshot.topic_counts.push(topic(label, 1)),
            }
        }

        let today = day_label(weekday);
        if let Some(bucket) = self.snapshot.daily_volume.iter_mut().find(|d| d.day_label == today) {
            bucket.count += 1;
        }

        self.persist();
        self.notify(AnalyticsSignal::Changed);
    }

    /// Nudges the success rate: `+0.1` on success, `-0.5` on failure, clamped to `[0, 100]`.
    pub fn record_outcome(&mut self, succeeded: bool) {
        let rate = self.snapshot.success_rate;
        self.snapshot.success_rate = if succeeded {
            round1(rate + SUCCESS_STEP).min(100.0)
        } else {
            round1(rate - FAILURE_STEP).max(0.0)
        };

        self.persist();
        self.notify(AnalyticsSignal::Changed);
    }

    pub fn reset(&mut self) {
        info!("Resetting analytics to seed defaults");
        self.snapshot = UsageSnapshot::seed();
        self.persist();
        self.notify(AnalyticsSignal::ReloadRequired);
    }

    /// Best effort: the in-memory snapshot stays authoritative when storage fails.
    fn persist(&self) {
        let result = store::encode(&self.snapshot).and_then(|text| self.store.save(&text));
        if let Err(e) = result {
            warn!("Failed to persist analytics snapshot: {}", e);
        }
    }

    fn notify(&self, signal: AnalyticsSignal) {
        // No subscribers is fine.
        let _ = self.signal.send(signal);
    }
}

#[async_trait]
impl TurnObserver for Mutex<UsageAggregator> {
    async fn on_submission(&self, query: &str) {
        self.lock().await.record_submission(query);
    }

    async fn on_outcome(&self, succeeded: bool) {
        self.lock().await.record_outcome(succeeded);
    }
}
