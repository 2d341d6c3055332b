//! Plain-text rendering of the tracker status for the terminal console.

mod panel;

pub use panel::{
    render_logs, render_series, render_status, RedrawLimiter, StatusView, MIN_REDRAW_INTERVAL,
    PANEL_WIDTH,
};
