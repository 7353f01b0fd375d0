use std::io::Write;

use crate::dashboard::{ChartOptions, ChartPatch, ConnectionState, Pulse, Renderer};

/// Terminal renderer: one CSV row per dashboard refresh.
///
/// Columns are `t_ms,rate,min,max,state,pulse`. The rate column carries
/// the placeholder while there is nothing to show; `pulse` is the
/// animation speed, empty while paused.
pub struct ConsoleRenderer<W> {
    out: W,
    pending: Option<ChartPatch>,
}

impl<W: Write> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, pending: None }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{line}") {
            tracing::warn!(error = %e, "Failed to write dashboard output");
        }
    }
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl<W: Write> Renderer for ConsoleRenderer<W> {
    fn init_chart(&mut self, options: &ChartOptions) {
        tracing::info!(
            series = options.series_name,
            window_ms = options.window_ms,
            "Chart initialised"
        );
        self.write_line(&format!("t_ms,rate_{},min,max,state,pulse", options.unit));
    }

    fn patch_chart(&mut self, patch: &ChartPatch) {
        self.pending = Some(patch.clone());
    }

    // Always follows patch_chart within a refresh, so the row is written here.
    fn update_pulse(&mut self, pulse: &Pulse, state: ConnectionState, rate: &str) {
        let Some(patch) = self.pending.take() else {
            return;
        };
        let state = match state {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        let speed = pulse.playing.then(|| format!("{:.2}", pulse.playback_rate));
        let row = format!(
            "{},{rate},{},{},{state},{}",
            cell(patch.series.last().map(|&(t, _)| t)),
            cell(patch.mark_min),
            cell(patch.mark_max),
            cell(speed),
        );
        self.write_line(&row);
    }
}
