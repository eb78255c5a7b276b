use crate::error::TrendsResult;
use crate::query::filter::{all_match, as_number};
use crate::storage::{DimensionKey, EventRow, EventStore, FetchRequest};
use crate::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Events grouped by name, each group ordered by `(timestamp, insertion sequence)`
/// so identical timestamps keep every record.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: HashMap<String, BTreeMap<(DateTime<Utc>, u64), Event>>,
    sequence: u64,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut store = Self::new();
        store.extend(events);
        store
    }

    pub fn insert(&mut self, event: Event) {
        let key = (event.timestamp, self.sequence);
        self.sequence += 1;
        self.events
            .entry(event.event.clone())
            .or_insert_with(BTreeMap::new)
            .insert(key, event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.insert(event);
        }
    }

    pub fn len(&self) -> usize {
        self.events.values().map(|e| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.keys().cloned().collect();
        names.sort();
        names
    }

    fn scan(&self, request: &FetchRequest) -> Vec<EventRow> {
        let Some(series) = self.events.get(&request.event) else {
            return Vec::new();
        };
        if request.start >= request.end {
            return Vec::new();
        }

        series
            .range((request.start, 0)..(request.end, 0))
            .map(|(_, event)| event)
            .filter(|event| all_match(&request.predicates, &event.properties))
            .map(|event| EventRow {
                timestamp: event.timestamp,
                value: request
                    .property
                    .as_ref()
                    .and_then(|key| event.properties.get(key))
                    .and_then(as_number),
                dimension: match &request.dimension {
                    Some(key) => DimensionKey::from_property(event.properties.get(key)),
                    None => DimensionKey::None,
                },
                distinct_id: event.distinct_id.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn fetch(&self, request: &FetchRequest) -> TrendsResult<Vec<EventRow>> {
        Ok(self.scan(request))
    }
}
