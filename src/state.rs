use std::{
    collections::{BTreeMap, VecDeque},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use serde_json::Value;

use crate::payload::{
    TelemetryMessage, FIELD_ACTION, FIELD_DIFF, FIELD_EMERGENCY, FIELD_LDR_LEFT,
    FIELD_LDR_RIGHT, FIELD_LIMIT_LEFT, FIELD_LIMIT_RIGHT, FIELD_MANUAL,
};

pub const DEFAULT_SAMPLE_CAPACITY: usize = 50;
pub const DEFAULT_LOG_CAPACITY: usize = 10;
pub const DEFAULT_STALE_AFTER_MS: u64 = 2_000;
/// LDR difference above which the tracker is considered off-sun.
pub const MISALIGNMENT_THRESHOLD: f64 = 45.0;

/// Latest value seen for every telemetry field.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    fields: BTreeMap<String, Value>,
}

impl Default for TelemetrySnapshot {
    /// Seeded with the values the controller reports at rest.
    fn default() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(FIELD_LDR_LEFT.to_string(), Value::from(0));
        fields.insert(FIELD_LDR_RIGHT.to_string(), Value::from(0));
        fields.insert(FIELD_MANUAL.to_string(), Value::Bool(false));
        fields.insert(FIELD_LIMIT_LEFT.to_string(), Value::from(0));
        fields.insert(FIELD_LIMIT_RIGHT.to_string(), Value::from(0));
        Self { fields }
    }
}

impl TelemetrySnapshot {
    pub fn empty() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    pub fn from_fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Shallow merge: incoming keys overwrite, the rest stay as they were.
    pub fn merge(&mut self, message: &TelemetryMessage) {
        for (key, value) in message.fields() {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Flag fields arrive as booleans or 0/1 integers.
    pub fn flag(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            _ => false,
        }
    }

    pub fn ldr_left(&self) -> Option<f64> {
        self.number(FIELD_LDR_LEFT)
    }

    pub fn ldr_right(&self) -> Option<f64> {
        self.number(FIELD_LDR_RIGHT)
    }

    pub fn manual(&self) -> bool {
        self.flag(FIELD_MANUAL)
    }

    pub fn limit_left(&self) -> bool {
        self.flag(FIELD_LIMIT_LEFT)
    }

    pub fn limit_right(&self) -> bool {
        self.flag(FIELD_LIMIT_RIGHT)
    }

    pub fn emergency(&self) -> bool {
        self.flag(FIELD_EMERGENCY)
    }

    /// Controller-computed difference, as reported.
    pub fn reported_diff(&self) -> Option<f64> {
        self.number(FIELD_DIFF)
    }

    pub fn action(&self) -> Option<String> {
        match self.fields.get(FIELD_ACTION)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Null => None,
            Value::String(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Left minus right reading.
    pub fn difference(&self) -> Option<f64> {
        Some(self.ldr_left()? - self.ldr_right()?)
    }

    pub fn misaligned(&self) -> bool {
        self.difference()
            .is_some_and(|d| d.abs() > MISALIGNMENT_THRESHOLD)
    }

    /// Difference magnitude clamped to a 0..=100 gauge.
    pub fn difference_gauge(&self) -> u8 {
        self.difference()
            .map(|d| d.abs().min(100.0).round() as u8)
            .unwrap_or(0)
    }
}

/// One point of the light-intensity chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub at: DateTime<Local>,
    pub left: f64,
    pub right: f64,
}

/// Bounded, arrival-ordered sample window.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl Default for SampleSeries {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SAMPLE_CAPACITY)
    }
}

impl SampleSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }
}

/// A device log line with its arrival time.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Bounded newest-first log list.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFeed {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl LogFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn newest(&self) -> Option<&LogEntry> {
        self.entries.front()
    }
}

/// Whether telemetry is still arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Live,
    Lost,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Live => "Live",
            Signal::Lost => "Signal Lost",
        }
    }
}

/// What [`TelemetryState::apply`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Log,
    Telemetry { sampled: bool },
}

/// Everything the console shows about the device.
#[derive(Debug, Clone)]
pub struct TelemetryState {
    pub snapshot: TelemetrySnapshot,
    pub series: SampleSeries,
    pub logs: LogFeed,
    last_update: Option<Instant>,
    last_update_at: Option<DateTime<Local>>,
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY, DEFAULT_LOG_CAPACITY)
    }
}

impl TelemetryState {
    pub fn new(sample_capacity: usize, log_capacity: usize) -> Self {
        Self {
            snapshot: TelemetrySnapshot::default(),
            series: SampleSeries::with_capacity(sample_capacity),
            logs: LogFeed::with_capacity(log_capacity),
            last_update: None,
            last_update_at: None,
        }
    }

    pub fn apply(&mut self, message: &TelemetryMessage) -> Applied {
        self.apply_at(message, Instant::now(), Local::now())
    }

    /// Reconcile one decoded message using the supplied clocks.
    pub fn apply_at(
        &mut self,
        message: &TelemetryMessage,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Applied {
        if let Some(text) = message.log_text() {
            self.logs.push(LogEntry {
                at: wall,
                message: text,
            });
            return Applied::Log;
        }

        self.snapshot.merge(message);
        self.last_update = Some(now);
        self.last_update_at = Some(wall);

        let sampled = match message.ldr_pair() {
            Some((left, right)) => {
                self.series.push(Sample {
                    at: wall,
                    left,
                    right,
                });
                true
            }
            None => false,
        };
        Applied::Telemetry { sampled }
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    pub fn last_update_at(&self) -> Option<DateTime<Local>> {
        self.last_update_at
    }

    /// Live while the last telemetry is younger than `stale_after`.
    pub fn signal(&self, now: Instant, stale_after: Duration) -> Signal {
        match self.last_update {
            Some(at) if now.saturating_duration_since(at) <= stale_after => Signal::Live,
            _ => Signal::Lost,
        }
    }
}
