use std::fmt::Write;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use loadwatch_core::{DisplayState, LoadingSnapshot};

use crate::state::{AppState, Session};

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = String::with_capacity(4096);

    let live: Vec<_> = state.sessions.iter().map(|e| Arc::clone(e.value())).collect();
    let mut sessions = Vec::with_capacity(live.len());
    for s in live {
        let snapshot = s.tracker.snapshot().await;
        sessions.push((s, snapshot));
    }

    // Writing to a String cannot fail.
    let _ = render(&mut out, &sessions);

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}

fn render(
    out: &mut String,
    sessions: &[(Arc<Session>, LoadingSnapshot)],
) -> std::fmt::Result {
    writeln!(out, "# TYPE loadwatch_session_info info")?;
    writeln!(out, "# HELP loadwatch_session_info Information about the loading session")?;
    for (s, _) in sessions {
        writeln!(
            out,
            "loadwatch_session_info{{session_id=\"{}\",label=\"{}\",created=\"{}\"}} 1",
            s.id(),
            escape(s.label.as_deref().unwrap_or("")),
            s.tracker.created_at().to_rfc3339()
        )?;
    }

    writeln!(out, "# TYPE loadwatch_session_state stateset")?;
    writeln!(out, "# HELP loadwatch_session_state Current display state of the session")?;
    for (s, snapshot) in sessions {
        for variant in DisplayState::ALL {
            writeln!(
                out,
                "loadwatch_session_state{{session_id=\"{}\",state=\"{}\"}} {}",
                s.id(),
                variant,
                if snapshot.state == variant { 1 } else { 0 }
            )?;
        }
    }

    writeln!(out, "# TYPE loadwatch_session_elapsed_seconds gauge")?;
    writeln!(out, "# HELP loadwatch_session_elapsed_seconds Seconds spent in the current loading attempt")?;
    for (s, snapshot) in sessions {
        writeln!(
            out,
            "loadwatch_session_elapsed_seconds{{session_id=\"{}\"}} {}",
            s.id(),
            snapshot.elapsed_secs
        )?;
    }

    writeln!(out, "# TYPE loadwatch_proxy_responding gauge")?;
    writeln!(out, "# HELP loadwatch_proxy_responding Whether the proxy has answered this session")?;
    for (s, snapshot) in sessions {
        writeln!(
            out,
            "loadwatch_proxy_responding{{session_id=\"{}\"}} {}",
            s.id(),
            u8::from(snapshot.proxy.is_responding)
        )?;
    }

    writeln!(out, "# TYPE loadwatch_proxy_segment_requests gauge")?;
    writeln!(out, "# HELP loadwatch_proxy_segment_requests Segment requests seen in the current attempt")?;
    for (s, snapshot) in sessions {
        writeln!(
            out,
            "loadwatch_proxy_segment_requests{{session_id=\"{}\"}} {}",
            s.id(),
            snapshot.proxy.segment_request_count
        )?;
    }

    writeln!(out, "# TYPE loadwatch_proxy_errors gauge")?;
    writeln!(out, "# HELP loadwatch_proxy_errors Errors recorded in the current attempt")?;
    for (s, snapshot) in sessions {
        writeln!(
            out,
            "loadwatch_proxy_errors{{session_id=\"{}\"}} {}",
            s.id(),
            snapshot.proxy.error_count
        )?;
    }

    writeln!(out, "# TYPE loadwatch_proxy_last_response_timestamp_seconds gauge")?;
    writeln!(
        out,
        "# HELP loadwatch_proxy_last_response_timestamp_seconds Unix timestamp of the last proxy response"
    )?;
    for (s, snapshot) in sessions {
        if let Some(t) = snapshot.proxy.last_response_time {
            let secs = t.timestamp() as f64 + (t.timestamp_subsec_millis() as f64 / 1000.0);
            writeln!(
                out,
                "loadwatch_proxy_last_response_timestamp_seconds{{session_id=\"{}\"}} {:.3}",
                s.id(),
                secs
            )?;
        }
    }

    writeln!(out, "# TYPE loadwatch_overlay_actions counter")?;
    writeln!(out, "# HELP loadwatch_overlay_actions Overlay actions triggered since creation")?;
    for (s, _) in sessions {
        writeln!(
            out,
            "loadwatch_overlay_actions_total{{session_id=\"{}\",action=\"retry\"}} {}",
            s.id(),
            s.retry_requests()
        )?;
        writeln!(
            out,
            "loadwatch_overlay_actions_total{{session_id=\"{}\",action=\"switch_source\"}} {}",
            s.id(),
            s.switch_requests()
        )?;
    }

    writeln!(out, "# EOF")
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
