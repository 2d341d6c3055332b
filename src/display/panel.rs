use std::fmt::Write as _;
use std::time::{Duration, Instant};

use crate::app::ConnectionState;
use crate::state::{LogFeed, SampleSeries, Signal, TelemetryState};

pub const PANEL_WIDTH: usize = 56;
const GAUGE_WIDTH: usize = 20;
/// Minimum spacing between two automatic panel redraws.
pub const MIN_REDRAW_INTERVAL: Duration = Duration::from_millis(250);

/// What the status panel needs from the session at one instant.
pub struct StatusView<'a> {
    pub device: &'a str,
    pub connection: ConnectionState,
    pub signal: Signal,
    pub state: &'a TelemetryState,
}

pub fn render_status(view: &StatusView<'_>) -> String {
    let snapshot = &view.state.snapshot;
    let mut out = String::new();
    let rule = "=".repeat(PANEL_WIDTH);

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "{}",
        truncate_with_ellipsis(
            &format!(
                "SOLAR TRACKER  {}  [{}]  {}",
                view.device,
                view.connection,
                view.signal.as_str()
            ),
            PANEL_WIDTH
        )
    );
    let _ = writeln!(out, "{}", "-".repeat(PANEL_WIDTH));
    let _ = writeln!(
        out,
        "Light       L {:>7}   R {:>7}",
        reading(snapshot.ldr_left()),
        reading(snapshot.ldr_right())
    );

    let gauge = snapshot.difference_gauge();
    let alert = if snapshot.misaligned() { "  ALERT" } else { "" };
    let _ = writeln!(
        out,
        "Difference  {:>7}   [{}] {:>3}%{alert}",
        reading(snapshot.difference()),
        render_bar(gauge, GAUGE_WIDTH),
        gauge
    );
    let _ = writeln!(
        out,
        "Mode        {}",
        if snapshot.manual() {
            "MANUAL MODE"
        } else {
            "AUTO TRACKING"
        }
    );
    let _ = writeln!(
        out,
        "Limits      Left {}   Right {}",
        lamp(snapshot.limit_left()),
        lamp(snapshot.limit_right())
    );
    let _ = writeln!(
        out,
        "Emergency   {}",
        if snapshot.emergency() {
            "ACTIVE (estop to resume)"
        } else {
            "clear"
        }
    );
    let _ = writeln!(
        out,
        "Controller  Diff: {}   Action: {}",
        reading(Some(snapshot.reported_diff().unwrap_or(0.0))),
        snapshot.action().unwrap_or_else(|| "Unknown".to_string())
    );
    if let Some(at) = view.state.last_update_at() {
        let _ = writeln!(out, "Updated     {}", at.format("%H:%M:%S"));
    }
    let _ = writeln!(out, "{}", "-".repeat(PANEL_WIDTH));
    out.push_str(&render_series(&view.state.series));
    let _ = writeln!(out, "{}", "-".repeat(PANEL_WIDTH));
    out.push_str(&render_logs(&view.state.logs));
    let _ = writeln!(out, "{rule}");
    out
}

/// One-paragraph summary of the light-intensity window.
pub fn render_series(series: &SampleSeries) -> String {
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return "Samples     none yet\n".to_string();
    };
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for sample in series.iter() {
        min = min.min(sample.left.min(sample.right));
        max = max.max(sample.left.max(sample.right));
    }
    format!(
        "Samples     {}/{} from {} to {}\n            last L {} R {}   range {}..{}\n",
        series.len(),
        series.capacity(),
        first.at.format("%H:%M:%S"),
        last.at.format("%H:%M:%S"),
        reading(Some(last.left)),
        reading(Some(last.right)),
        reading(Some(min)),
        reading(Some(max)),
    )
}

/// Log feed, newest first.
pub fn render_logs(logs: &LogFeed) -> String {
    if logs.is_empty() {
        return "No activity logs...\n".to_string();
    }
    let mut out = String::new();
    for entry in logs.iter() {
        let _ = writeln!(
            out,
            "{}",
            truncate_with_ellipsis(&entry.to_string(), PANEL_WIDTH)
        );
    }
    out
}

/// Rate limit for automatic redraws.
#[derive(Debug)]
pub struct RedrawLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Default for RedrawLimiter {
    fn default() -> Self {
        Self::new(MIN_REDRAW_INTERVAL)
    }
}

impl RedrawLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// True (and the clock restarts) when enough time has passed.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Time until the next redraw may happen.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.last
            .map(|last| {
                self.min_interval
                    .saturating_sub(now.saturating_duration_since(last))
            })
            .unwrap_or(Duration::ZERO)
    }
}

fn reading(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 => format!("{v:.0}"),
        Some(v) => format!("{v:.1}"),
        None => "--".to_string(),
    }
}

fn lamp(on: bool) -> &'static str {
    if on {
        "[HIT]"
    } else {
        "[ - ]"
    }
}

fn render_bar(percent: u8, width: usize) -> String {
    let filled = (usize::from(percent.min(100)) * width) / 100;
    let mut s = String::with_capacity(width);
    for col in 0..width {
        s.push(if col < filled { '#' } else { '.' });
    }
    s
}

fn truncate_with_ellipsis(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width <= 3 {
        return text.chars().take(width).collect();
    }
    let mut s: String = text.chars().take(width - 3).collect();
    s.push_str("...");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{decode_line, Decoded};
    use crate::state::TelemetryState;

    fn apply(state: &mut TelemetryState, raw: &str) {
        match decode_line(raw) {
            Decoded::Message(m) => {
                state.apply(&m);
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    fn view(state: &TelemetryState, signal: Signal) -> String {
        render_status(&StatusView {
            device: "/dev/ttyACM0",
            connection: ConnectionState::Connected,
            signal,
            state,
        })
    }

    #[test]
    fn fresh_state_shows_placeholders() {
        let state = TelemetryState::default();
        let panel = view(&state, Signal::Lost);
        assert!(panel.contains("[Connected]  Signal Lost"));
        assert!(panel.contains("AUTO TRACKING"));
        assert!(panel.contains("Action: Unknown"));
        assert!(panel.contains("Diff: 0"));
        assert!(panel.contains("Samples     none yet"));
        assert!(panel.contains("No activity logs..."));
        assert!(!panel.contains("ALERT"));
    }

    #[test]
    fn telemetry_drives_panel() {
        let mut state = TelemetryState::default();
        apply(
            &mut state,
            r#"{"LDR_L":400,"LDR_R":340,"Manual":true,"LimitL":1,"Emergency":true,"Diff":60,"Action":"EAST"}"#,
        );
        apply(&mut state, r#"{"Log":"Limit reached"}"#);
        let panel = view(&state, Signal::Live);
        assert!(panel.contains("Live"));
        assert!(panel.contains("L     400   R     340"));
        assert!(panel.contains("ALERT"));
        assert!(panel.contains("MANUAL MODE"));
        assert!(panel.contains("Left [HIT]   Right [ - ]"));
        assert!(panel.contains("ACTIVE"));
        assert!(panel.contains("Action: EAST"));
        assert!(panel.contains("1/50"));
        assert!(panel.contains("Limit reached"));
    }

    #[test]
    fn bar_scales_with_percent() {
        assert_eq!(render_bar(0, 10), "..........");
        assert_eq!(render_bar(50, 10), "#####.....");
        assert_eq!(render_bar(100, 10), "##########");
    }

    #[test]
    fn long_lines_get_ellipsis() {
        assert_eq!(truncate_with_ellipsis("THIS STRING IS LONG", 6), "THI...");
        assert_eq!(truncate_with_ellipsis("short", 6), "short");
    }

    #[test]
    fn limiter_spaces_redraws() {
        let mut limiter = RedrawLimiter::new(Duration::from_millis(250));
        let t0 = Instant::now();
        assert!(limiter.allow(t0));
        assert!(!limiter.allow(t0 + Duration::from_millis(100)));
        assert_eq!(
            limiter.remaining(t0 + Duration::from_millis(100)),
            Duration::from_millis(150)
        );
        assert!(limiter.allow(t0 + Duration::from_millis(250)));
    }
}
