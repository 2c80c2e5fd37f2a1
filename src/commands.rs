//! JSON-lines command channel: one request object per line in, one reply per line out.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    capture::entitlement,
    error::{CaptureError, CaptureResult},
    models::{Caller, CaptureSettings, SubscriptionTier},
    AppState,
};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Start {
        owner_id: String,
        subscription: SubscriptionTier,
        project_id: String,
        #[serde(default)]
        settings: CaptureSettings,
    },
    #[serde(rename_all = "camelCase")]
    Pause { owner_id: String, session_id: String },
    #[serde(rename_all = "camelCase")]
    Resume { owner_id: String, session_id: String },
    #[serde(rename_all = "camelCase")]
    Stop { owner_id: String, session_id: String },
    #[serde(rename_all = "camelCase")]
    Get { owner_id: String, session_id: String },
    #[serde(rename_all = "camelCase")]
    List { owner_id: String },
    #[serde(rename_all = "camelCase")]
    Pauses { owner_id: String, session_id: String },
    Entitlements { subscription: SubscriptionTier },
    Metrics,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Answers every line of `reader` on `writer` until EOF.
///
/// Lines are decoded lossily, so bytes that are not UTF-8 end up as a
/// `BadRequest` reply instead of ending the stream.
pub async fn serve<R, W>(state: &AppState, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("failed to read command")?;
        if read == 0 {
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut reply = handle_line(state, line).await;
        reply.push('\n');
        writer
            .write_all(reply.as_bytes())
            .await
            .context("failed to write reply")?;
        writer.flush().await.context("failed to flush reply")?;
    }
}

/// Parses one line, runs it and renders the reply line.
pub async fn handle_line(state: &AppState, line: &str) -> String {
    let reply = match serde_json::from_str::<Request>(line) {
        Ok(request) => {
            debug!("Command received: {request:?}");
            match dispatch(state, request).await {
                Ok(data) => json!({ "ok": true, "data": data }),
                Err(err) => error_reply(&err),
            }
        }
        Err(err) => {
            warn!("Rejected malformed command: {err}");
            json!({
                "ok": false,
                "error": ErrorBody {
                    kind: "BadRequest",
                    message: err.to_string(),
                    details: None,
                },
            })
        }
    };
    reply.to_string()
}

fn error_reply(err: &CaptureError) -> Value {
    if let CaptureError::Internal(inner) = err {
        warn!("Command failed internally: {inner:#}");
    }
    json!({
        "ok": false,
        "error": ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
            details: err.details(),
        },
    })
}

pub async fn dispatch(state: &AppState, request: Request) -> CaptureResult<Value> {
    let coordinator = &state.coordinator;
    let value = match request {
        Request::Start {
            owner_id,
            subscription,
            project_id,
            settings,
        } => {
            let caller = Caller::new(owner_id, subscription);
            to_value(coordinator.start(&caller, &project_id, settings).await?)?
        }
        Request::Pause {
            owner_id,
            session_id,
        } => to_value(coordinator.pause(&session_id, &owner_id).await?)?,
        Request::Resume {
            owner_id,
            session_id,
        } => to_value(coordinator.resume(&session_id, &owner_id).await?)?,
        Request::Stop {
            owner_id,
            session_id,
        } => to_value(coordinator.stop(&session_id, &owner_id).await?)?,
        Request::Get {
            owner_id,
            session_id,
        } => to_value(coordinator.get(&session_id, &owner_id).await?)?,
        Request::List { owner_id } => to_value(coordinator.list(&owner_id).await?)?,
        Request::Pauses {
            owner_id,
            session_id,
        } => to_value(coordinator.pauses(&session_id, &owner_id).await?)?,
        Request::Entitlements { subscription } => json!({
            "subscription": subscription,
            "availableQualities": entitlement::available_qualities(subscription),
        }),
        Request::Metrics => to_value(state.sampler.snapshot().await)?,
    };
    Ok(value)
}

fn to_value<T: Serialize>(value: T) -> CaptureResult<Value> {
    Ok(serde_json::to_value(value).map_err(anyhow::Error::from)?)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        capture::{CaptureCoordinator, LifecycleTimings, SimulatedBackend},
        clock::ManualClock,
        metrics::PerformanceSampler,
        store::MemoryStore,
    };

    fn state() -> AppState {
        AppState {
            coordinator: CaptureCoordinator::new(
                Arc::new(MemoryStore::new()),
                Arc::new(SimulatedBackend::new("/videos".into(), Duration::ZERO)),
                Arc::new(ManualClock::new(chrono::Utc::now())),
                LifecycleTimings::default(),
            ),
            sampler: PerformanceSampler::new(),
        }
    }

    async fn send(state: &AppState, line: &str) -> Value {
        serde_json::from_str(&handle_line(state, line).await).unwrap()
    }

    #[tokio::test]
    async fn start_then_get_round_trips_through_json() {
        let state = state();
        let started = send(
            &state,
            r#"{"command":"start","ownerId":"u1","subscription":"pro","projectId":"p1","settings":{"quality":"1080p","fps":30}}"#,
        )
        .await;
        assert_eq!(started["ok"], true);
        assert_eq!(started["data"]["state"], "starting");
        let id = started["data"]["id"].as_str().unwrap().to_string();

        let fetched = send(
            &state,
            &format!(r#"{{"command":"get","ownerId":"u1","sessionId":"{id}"}}"#),
        )
        .await;
        assert_eq!(fetched["data"]["projectId"], "p1");

        let listed = send(&state, r#"{"command":"list","ownerId":"u1"}"#).await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_carry_kind_and_details() {
        let state = state();
        let denied = send(
            &state,
            r#"{"command":"start","ownerId":"u1","subscription":"free","projectId":"p1","settings":{"quality":"4k"}}"#,
        )
        .await;
        assert_eq!(denied["ok"], false);
        assert_eq!(denied["error"]["kind"], "EntitlementDenied");
        assert_eq!(
            denied["error"]["message"],
            "4k recording requires Team or Enterprise subscription"
        );
        assert_eq!(denied["error"]["details"]["availableQualities"], json!(["720p"]));

        let missing = send(&state, r#"{"command":"stop","ownerId":"u1","sessionId":"nope"}"#).await;
        assert_eq!(missing["error"]["kind"], "NotFound");
        assert!(missing["error"].get("details").is_none());

        let garbage = send(&state, "not json").await;
        assert_eq!(garbage["error"]["kind"], "BadRequest");
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_answered_and_the_stream_continues() {
        let state = state();
        let input: &[u8] = b"{\"command\":\"list\",\"ownerId\":\"a\"}\n\xff\xfe\n\n{\"command\":\"list\",\"ownerId\":\"a\"}";
        let mut output = Vec::new();

        serve(&state, input, &mut output).await.unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["ok"], true);
        assert_eq!(replies[1]["ok"], false);
        assert_eq!(replies[1]["error"]["kind"], "BadRequest");
        assert_eq!(replies[2]["data"], json!([]));
    }

    #[tokio::test]
    async fn entitlements_lists_tier_qualities() {
        let state = state();
        let reply = send(&state, r#"{"command":"entitlements","subscription":"pro"}"#).await;
        assert_eq!(
            reply["data"]["availableQualities"],
            json!(["720p", "1080p", "1440p"])
        );
    }
}
