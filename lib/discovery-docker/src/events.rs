//! Container lifecycle events from `GET /events`

use crate::client::DockerClient;
use discovery_core::{LifecycleEvent, RuntimeError};
use http_body_util::BodyExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// `filters={"type":["container"]}`, URL-encoded
const CONTAINER_FILTER: &str = "filters=%7B%22type%22%3A%5B%22container%22%5D%7D";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct RawActor {
    #[serde(rename = "ID", default)]
    id: Option<String>,
}

/// One message of the event stream. Older API versions carry `status` and
/// `id`; newer ones only `Action` and `Actor.ID`.
#[derive(Debug, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "Type", default)]
    kind: Option<String>,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "Actor", default)]
    actor: Option<RawActor>,
    #[serde(rename = "timeNano", default)]
    time_nano: Option<i64>,
}

impl RawEvent {
    pub fn time_nano(&self) -> Option<i64> {
        self.time_nano
    }

    /// The lifecycle event for container messages; `None` for other types or
    /// messages without a container id.
    pub fn into_lifecycle_event(self) -> Option<LifecycleEvent> {
        if matches!(self.kind.as_deref(), Some(kind) if kind != "container") {
            return None;
        }

        let container_id = self
            .id
            .filter(|id| !id.is_empty())
            .or_else(|| self.actor.and_then(|a| a.id))
            .filter(|id| !id.is_empty())?;
        let status = self
            .status
            .filter(|s| !s.is_empty())
            .or(self.action)
            .unwrap_or_default();

        Some(LifecycleEvent::new(container_id, status))
    }
}

/// Incremental decoder for a stream of concatenated JSON objects.
///
/// Objects split across chunks are held until complete; a malformed line is
/// reported and skipped.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
}

impl EventDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<RawEvent, RuntimeError>> {
        self.buf.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        let mut consumed = 0;
        loop {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf[consumed..]).into_iter::<RawEvent>();
            match stream.next() {
                Some(Ok(event)) => {
                    consumed += stream.byte_offset();
                    decoded.push(Ok(event));
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    decoded.push(Err(RuntimeError::Decode(e.to_string())));
                    match self.buf[consumed..].iter().position(|b| *b == b'\n') {
                        Some(newline) => consumed += newline + 1,
                        None => {
                            consumed = self.buf.len();
                            break;
                        }
                    }
                }
                None => {
                    consumed = self.buf.len();
                    break;
                }
            }
        }

        self.buf.drain(..consumed);
        decoded
    }
}

/// Query string for the event stream, resuming after `since` (nanoseconds)
pub fn events_path(client: &DockerClient, since: Option<i64>) -> String {
    match since {
        Some(nanos) => client.path(&format!(
            "/events?{}&since={}.{:09}",
            CONTAINER_FILTER,
            nanos / 1_000_000_000,
            nanos % 1_000_000_000
        )),
        None => client.path(&format!("/events?{}", CONTAINER_FILTER)),
    }
}

/// Keep an event stream open until cancelled, reconnecting with backoff.
pub(crate) async fn stream_events(
    client: DockerClient,
    event_tx: mpsc::Sender<LifecycleEvent>,
    error_tx: mpsc::Sender<RuntimeError>,
    cancel: CancellationToken,
) {
    let mut since = None;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let resumed_from = since;
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = follow_events(&client, &mut since, &event_tx, &error_tx) => result,
        };

        if event_tx.is_closed() {
            return;
        }

        match result {
            Ok(()) => warn!("Docker event stream ended"),
            Err(e) => report(&error_tx, e),
        }

        if since != resumed_from {
            backoff = INITIAL_BACKOFF;
        }
        info!("Reconnecting to Docker event stream in {:?}", backoff);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Forward events from one connection until the stream ends or fails.
async fn follow_events(
    client: &DockerClient,
    since: &mut Option<i64>,
    event_tx: &mpsc::Sender<LifecycleEvent>,
    error_tx: &mpsc::Sender<RuntimeError>,
) -> Result<(), RuntimeError> {
    let mut body = client.get_stream(&events_path(client, *since)).await?;
    debug!(since = ?since, "Subscribed to Docker events");

    let mut decoder = EventDecoder::default();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| RuntimeError::Transport(e.to_string()))?;
        let Ok(data) = frame.into_data() else {
            continue;
        };

        for raw in decoder.push(&data) {
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    report(error_tx, e);
                    continue;
                }
            };
            if let Some(time_nano) = raw.time_nano() {
                *since = Some(time_nano);
            }
            if let Some(event) = raw.into_lifecycle_event() {
                if event_tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn report(error_tx: &mpsc::Sender<RuntimeError>, error: RuntimeError) {
    if let Err(mpsc::error::TrySendError::Full(error)) = error_tx.try_send(error) {
        warn!("Dropping Docker event error, error channel full: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DockerHost;
    use std::path::PathBuf;

    const LEGACY_START: &str = r#"{"status":"start","id":"4a2f","from":"registry/api:1.2","Type":"container","Action":"start","Actor":{"ID":"4a2f","Attributes":{"discovery.service.name":"api"}},"scope":"local","time":1700000000,"timeNano":1700000000123456789}"#;
    const MODERN_DIE: &str = r#"{"Type":"container","Action":"die","Actor":{"ID":"9bc1","Attributes":{"exitCode":"0"}},"scope":"local","time":1700000001,"timeNano":1700000001000000001}"#;
    const NETWORK_CONNECT: &str = r#"{"Type":"network","Action":"connect","Actor":{"ID":"net0","Attributes":{"container":"4a2f"}},"scope":"local","time":1700000002,"timeNano":1700000002000000000}"#;

    #[test]
    fn test_legacy_event_fields() {
        let raw: RawEvent = serde_json::from_str(LEGACY_START).unwrap();
        assert_eq!(raw.time_nano(), Some(1_700_000_000_123_456_789));
        assert_eq!(
            raw.into_lifecycle_event(),
            Some(LifecycleEvent::new("4a2f", "start"))
        );
    }

    #[test]
    fn test_action_and_actor_fallback() {
        let raw: RawEvent = serde_json::from_str(MODERN_DIE).unwrap();
        assert_eq!(
            raw.into_lifecycle_event(),
            Some(LifecycleEvent::new("9bc1", "die"))
        );
    }

    #[test]
    fn test_non_container_events_are_skipped() {
        let raw: RawEvent = serde_json::from_str(NETWORK_CONNECT).unwrap();
        assert_eq!(raw.into_lifecycle_event(), None);
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let stream = format!("{}\n{}\n", LEGACY_START, MODERN_DIE);
        let (first, second) = stream.as_bytes().split_at(LEGACY_START.len() + 20);

        let mut decoder = EventDecoder::default();
        let events: Vec<LifecycleEvent> = decoder
            .push(first)
            .into_iter()
            .chain(decoder.push(second))
            .filter_map(|r| r.unwrap().into_lifecycle_event())
            .collect();

        assert_eq!(
            events,
            vec![
                LifecycleEvent::new("4a2f", "start"),
                LifecycleEvent::new("9bc1", "die"),
            ]
        );
    }

    #[test]
    fn test_decoder_waits_for_complete_object() {
        let mut decoder = EventDecoder::default();
        assert!(decoder.push(&LEGACY_START.as_bytes()[..10]).is_empty());
        let decoded = decoder.push(&LEGACY_START.as_bytes()[10..]);
        assert_eq!(decoded.len(), 1);
        assert!(decoder.push(b"\n").is_empty());
    }

    #[test]
    fn test_decoder_skips_malformed_line() {
        let mut decoder = EventDecoder::default();
        let stream = format!("not json\n{}\n", MODERN_DIE);
        let decoded = decoder.push(stream.as_bytes());

        assert_eq!(decoded.len(), 2);
        assert!(matches!(decoded[0], Err(RuntimeError::Decode(_))));
        assert!(decoded[1].is_ok());
    }

    #[test]
    fn test_events_path() {
        let client = DockerClient::new(
            DockerHost::Unix(PathBuf::from("/var/run/docker.sock")),
            None,
        );
        assert_eq!(
            events_path(&client, None),
            format!("/events?{}", CONTAINER_FILTER)
        );
        assert_eq!(
            events_path(&client, Some(1_700_000_000_000_000_042)),
            format!("/events?{}&since=1700000000.000000042", CONTAINER_FILTER)
        );
    }
}
