//! Dashboard state: connection flag, rolling sample window, and the
//! chart/pulse side effects derived from them.
//!
//! All mutation goes through [`Dashboard::handle`], which recomputes the
//! window view and pushes it to the [`Renderer`] after every event. The
//! chart receives its full [`ChartOptions`] once, from
//! [`Dashboard::mount`]; after that only [`ChartPatch`]es are sent.

use crate::message::WsMessage;
use crate::transport::SocketEvent;
use crate::window::{RateWindow, Sample, WindowConfig, WindowView};

/// Shown instead of a rate when there is none to show.
pub const RATE_PLACEHOLDER: &str = "--";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// The parts of the chart that change between updates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChartPatch {
    /// `(t_ms, rate)` points, oldest first.
    pub series: Vec<(i64, u16)>,
    /// Left edge of the x axis.
    pub x_min: Option<i64>,
    /// Marker lines.
    pub mark_min: Option<u16>,
    pub mark_max: Option<u16>,
}

/// Full chart configuration, applied once on mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartOptions {
    pub series_name: &'static str,
    pub unit: &'static str,
    pub window_ms: i64,
    pub data: ChartPatch,
}

/// Heart-icon animation state. Paused until a positive rate arrives while
/// connected; plays at `rate / 60` so 60 bpm is 1x.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pulse {
    pub playback_rate: f64,
    pub playing: bool,
}

impl Default for Pulse {
    fn default() -> Self {
        Self {
            playback_rate: 1.0,
            playing: false,
        }
    }
}

/// Output side of the dashboard.
pub trait Renderer {
    fn init_chart(&mut self, options: &ChartOptions);
    fn patch_chart(&mut self, patch: &ChartPatch);
    fn update_pulse(&mut self, pulse: &Pulse, state: ConnectionState, rate: &str);
}

pub struct Dashboard<R> {
    state: ConnectionState,
    window: RateWindow,
    pulse: Pulse,
    renderer: R,
    mounted: bool,
}

impl<R: Renderer> Dashboard<R> {
    pub fn new(config: WindowConfig, renderer: R) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            window: RateWindow::new(config),
            pulse: Pulse::default(),
            renderer,
            mounted: false,
        }
    }

    /// Initialise the chart with full options. Later calls are ignored.
    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        let options = ChartOptions {
            series_name: "Heart Rate",
            unit: "bpm",
            window_ms: self.window.config().window.as_millis() as i64,
            data: self.chart_patch(&self.view()),
        };
        self.renderer.init_chart(&options);
        let rate = self.display_rate();
        self.renderer.update_pulse(&self.pulse, self.state, &rate);
    }

    pub fn handle(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Open => {
                tracing::debug!("Socket open, waiting for device status");
                return;
            }
            SocketEvent::Message(WsMessage::Status { connected }) => {
                self.state = if connected {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                };
                tracing::info!(state = ?self.state, "Device status changed");
            }
            SocketEvent::Message(WsMessage::Sample { t, r, s }) => {
                self.window.push(Sample::from_secs(t, r, s));
            }
            SocketEvent::Closed(info) => {
                self.state = ConnectionState::Disconnected;
                tracing::warn!(?info, "Socket closed");
            }
        }
        self.refresh();
    }

    fn refresh(&mut self) {
        if !self.mounted {
            self.mount();
        }
        let view = self.view();
        let patch = self.chart_patch(&view);
        self.renderer.patch_chart(&patch);

        match view.current {
            Some(rate) if rate > 0 && self.state == ConnectionState::Connected => {
                self.pulse.playback_rate = f64::from(rate) / 60.0;
                self.pulse.playing = true;
            }
            _ => self.pulse.playing = false,
        }
        let rate = self.display_rate();
        self.renderer.update_pulse(&self.pulse, self.state, &rate);
    }

    fn chart_patch(&self, view: &WindowView) -> ChartPatch {
        ChartPatch {
            series: self.window.samples().map(|s| (s.t_ms, s.rate)).collect(),
            x_min: view.min_bound,
            mark_min: view.min,
            mark_max: view.max,
        }
    }

    pub fn view(&self) -> WindowView {
        self.window.view(self.state == ConnectionState::Connected)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn window(&self) -> &RateWindow {
        &self.window
    }

    pub fn pulse(&self) -> &Pulse {
        &self.pulse
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }

    /// Current rate as text, or [`RATE_PLACEHOLDER`]. A zero rate (strap
    /// lost skin contact) is not a reading and shows the placeholder too.
    pub fn display_rate(&self) -> String {
        match self.view().current {
            Some(rate) if rate > 0 => rate.to_string(),
            _ => RATE_PLACEHOLDER.to_string(),
        }
    }
}
