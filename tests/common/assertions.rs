//! Event collection helpers

use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use usb_installer::Event;

/// Wait for the first event matching `predicate`
///
/// Returns None on timeout or if the channel closes.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: F,
) -> Option<Event>
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Drain every event already buffered on the receiver
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

/// Percent values from FetchProgress events, in order
pub fn progress_percents(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::FetchProgress { progress, .. } => progress.percent(),
            _ => None,
        })
        .collect()
}

/// Assert that no file (partial or complete) exists at `path`
pub fn assert_no_file(path: &Path) {
    assert!(
        !path.exists(),
        "expected no file at {}, but one exists",
        path.display()
    );
}
