use crate::error::{TrendsError, TrendsResult};
use crate::storage::MemoryEventStore;
use crate::Event;
use std::path::Path;
use tokio::fs as async_fs;
use tracing::{debug, info};

/// Reads events from a JSON array file or a JSON-lines file.
pub async fn load_events<P: AsRef<Path>>(path: P) -> TrendsResult<Vec<Event>> {
    let path = path.as_ref();
    let contents = async_fs::read_to_string(path).await?;
    let events = parse_events(&contents)?;
    info!("Loaded {} events from {}", events.len(), path.display());
    Ok(events)
}

pub fn parse_events(contents: &str) -> TrendsResult<Vec<Event>> {
    let trimmed = contents.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut events = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(line).map_err(|e| TrendsError::Store {
            message: format!("line {}: {}", line_no + 1, e),
        })?;
        events.push(event);
    }
    debug!("Parsed {} JSON-lines events", events.len());
    Ok(events)
}

pub async fn load_store<P: AsRef<Path>>(path: P) -> TrendsResult<MemoryEventStore> {
    let events = load_events(path).await?;
    Ok(MemoryEventStore::from_events(events))
}
