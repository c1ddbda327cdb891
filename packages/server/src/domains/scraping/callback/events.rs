//! Callback wire format.
//!
//! The subprocess posts one JSON envelope per event. The event kind is
//! decoded once at the boundary into [`CallbackEvent`]; handlers never look
//! at raw type strings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    pub session_id: i64,
    pub token: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub event_id: String,
    #[serde(flatten)]
    pub event: CallbackEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CallbackEvent {
    Log(LogPayload),
    Progress(ProgressPayload),
    TotalUrls(TotalUrlsPayload),
    MarkUrlFailed(MarkUrlFailedPayload),
    Finish(FinishPayload),
    PhaseStarted(PhaseStartedPayload),
    PhaseProgress(PhaseProgressPayload),
    PhaseFinished(PhaseFinishedPayload),
}

impl CallbackEvent {
    /// Event kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CallbackEvent::Log(_) => "log",
            CallbackEvent::Progress(_) => "progress",
            CallbackEvent::TotalUrls(_) => "total_urls",
            CallbackEvent::MarkUrlFailed(_) => "mark_url_failed",
            CallbackEvent::Finish(_) => "finish",
            CallbackEvent::PhaseStarted(_) => "phase_started",
            CallbackEvent::PhaseProgress(_) => "phase_progress",
            CallbackEvent::PhaseFinished(_) => "phase_finished",
        }
    }
}

/// A single entry or a batch; older scraper versions send one at a time.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LogPayload {
    Batch { entries: Vec<LogEntryPayload> },
    Single(LogEntryPayload),
}

#[derive(Debug, Deserialize)]
pub struct LogEntryPayload {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ProgressPayload {
    pub pages_processed: i32,
    #[serde(default)]
    pub total_urls: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct TotalUrlsPayload {
    pub total_urls: i32,
}

#[derive(Debug, Deserialize)]
pub struct MarkUrlFailedPayload {
    pub url: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Legacy whole-run completion signal.
#[derive(Debug, Deserialize)]
pub struct FinishPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub stats: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapePhase {
    Collect,
    Reset,
    Parse,
}

#[derive(Debug, Deserialize)]
pub struct PhaseStartedPayload {
    pub phase: ScrapePhase,
    #[serde(default)]
    pub pid: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct PhaseProgressPayload {
    pub phase: ScrapePhase,
    #[serde(default)]
    pub pages_processed: Option<i32>,
    #[serde(default)]
    pub items_updated: Option<i32>,
    #[serde(default)]
    pub errors_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct PhaseFinishedPayload {
    pub phase: ScrapePhase,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub stats: Option<serde_json::Value>,
}

/// Response for every callback, success or not. `command = "stop"` is the
/// only channel by which the subprocess learns it should terminate.
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub success: bool,
    pub command: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deferred: Option<bool>,
}

impl CallbackResponse {
    pub fn ok(stop: bool) -> Self {
        Self {
            success: true,
            command: stop.then_some("stop"),
            deferred: None,
        }
    }

    pub fn deferred(stop: bool) -> Self {
        Self {
            success: true,
            command: stop.then_some("stop"),
            deferred: Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: serde_json::Value) -> CallbackEnvelope {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn decodes_progress_event() {
        let envelope = decode(serde_json::json!({
            "session_id": 12,
            "token": "t",
            "timestamp": 1700000000,
            "event_id": "evt-1",
            "type": "progress",
            "payload": {"pages_processed": 40, "total_urls": 640}
        }));
        assert_eq!(envelope.session_id, 12);
        match envelope.event {
            CallbackEvent::Progress(p) => {
                assert_eq!(p.pages_processed, 40);
                assert_eq!(p.total_urls, Some(640));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decodes_single_and_batch_log_payloads() {
        let single = decode(serde_json::json!({
            "session_id": 1, "token": "t", "event_id": "e1",
            "type": "log",
            "payload": {"message": "hello"}
        }));
        match single.event {
            CallbackEvent::Log(LogPayload::Single(entry)) => {
                assert_eq!(entry.message, "hello");
                assert_eq!(entry.level, "info");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let batch = decode(serde_json::json!({
            "session_id": 1, "token": "t", "event_id": "e2",
            "type": "log",
            "payload": {"entries": [
                {"level": "warn", "message": "a"},
                {"message": "b", "details": {"url": "https://example.com"}}
            ]}
        }));
        match batch.event {
            CallbackEvent::Log(LogPayload::Batch { entries }) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].level, "warn");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn decodes_phase_finished_with_stats() {
        let envelope = decode(serde_json::json!({
            "session_id": 3, "token": "t", "event_id": "e3",
            "type": "phase_finished",
            "payload": {
                "phase": "collect",
                "status": "success",
                "stats": {"urls_sent_total": 640, "urls_unique_total": 612}
            }
        }));
        match envelope.event {
            CallbackEvent::PhaseFinished(p) => {
                assert_eq!(p.phase, ScrapePhase::Collect);
                assert_eq!(
                    p.stats.unwrap().get("urls_sent_total").unwrap().as_i64(),
                    Some(640)
                );
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result = serde_json::from_value::<CallbackEnvelope>(serde_json::json!({
            "session_id": 1, "token": "t", "event_id": "e",
            "type": "reboot",
            "payload": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn missing_event_id_is_rejected() {
        let result = serde_json::from_value::<CallbackEnvelope>(serde_json::json!({
            "session_id": 1, "token": "t",
            "type": "progress",
            "payload": {"pages_processed": 1}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn response_serializes_null_command() {
        let body = serde_json::to_value(CallbackResponse::ok(false)).unwrap();
        assert_eq!(body, serde_json::json!({"success": true, "command": null}));

        let stop = serde_json::to_value(CallbackResponse::ok(true)).unwrap();
        assert_eq!(stop, serde_json::json!({"success": true, "command": "stop"}));
    }

    #[test]
    fn deferred_response_carries_the_flag() {
        let body = serde_json::to_value(CallbackResponse::deferred(false)).unwrap();
        assert_eq!(body["deferred"], serde_json::json!(true));
    }
}
