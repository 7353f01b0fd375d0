use std::collections::VecDeque;
use std::time::Duration;

/// A heart-rate reading on the dashboard's millisecond time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub t_ms: i64,
    pub rate: u16,
    pub contact: Option<bool>,
}

impl Sample {
    /// Build a sample from a wire timestamp in seconds.
    pub fn from_secs(t: f64, rate: u16, contact: Option<bool>) -> Sample {
        Sample {
            t_ms: (t * 1000.0).round() as i64,
            rate,
            contact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Span used for current/min/max.
    pub window: Duration,
    /// Extra retention past the window.
    pub slack: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            slack: Duration::from_millis(3000),
        }
    }
}

/// Derived view over the retained samples. Recomputed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowView {
    /// `now - window`; `None` before the first sample.
    pub min_bound: Option<i64>,
    /// `now - window - slack`; `None` before the first sample.
    pub retention_bound: Option<i64>,
    pub current: Option<u16>,
    pub min: Option<u16>,
    pub max: Option<u16>,
}

/// Rolling buffer of samples, pruned on arrival.
///
/// "Now" is the timestamp of the most recently pushed sample. Each push
/// drops the contiguous prefix older than `now - window - slack`; the
/// buffer is not otherwise bounded.
#[derive(Debug, Clone)]
pub struct RateWindow {
    samples: VecDeque<Sample>,
    config: WindowConfig,
    now: Option<i64>,
}

impl RateWindow {
    pub fn new(config: WindowConfig) -> Self {
        RateWindow {
            samples: VecDeque::new(),
            config,
            now: None,
        }
    }

    pub fn config(&self) -> WindowConfig {
        self.config
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.window.as_millis()).unwrap_or(i64::MAX)
    }

    fn slack_ms(&self) -> i64 {
        i64::try_from(self.config.slack.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        self.now = Some(sample.t_ms);

        let cutoff = sample
            .t_ms
            .saturating_sub(self.window_ms())
            .saturating_sub(self.slack_ms());
        let keep_from = self
            .samples
            .iter()
            .position(|s| s.t_ms >= cutoff)
            .unwrap_or(self.samples.len());
        self.samples.drain(..keep_from);
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Compute the view. The current rate is withheld while disconnected.
    pub fn view(&self, connected: bool) -> WindowView {
        let Some(now) = self.now else {
            return WindowView::default();
        };
        let min_bound = now.saturating_sub(self.window_ms());

        let mut min = None;
        let mut max = None;
        for sample in self.samples.iter().filter(|s| s.t_ms >= min_bound) {
            min = Some(min.map_or(sample.rate, |m: u16| m.min(sample.rate)));
            max = Some(max.map_or(sample.rate, |m: u16| m.max(sample.rate)));
        }

        let current = if connected {
            self.samples.back().map(|s| s.rate)
        } else {
            None
        };

        WindowView {
            min_bound: Some(min_bound),
            retention_bound: Some(min_bound.saturating_sub(self.slack_ms())),
            current,
            min,
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t_ms: i64, rate: u16) -> Sample {
        Sample {
            t_ms,
            rate,
            contact: None,
        }
    }

    fn window() -> RateWindow {
        RateWindow::new(WindowConfig::default())
    }

    #[test]
    fn three_samples_inside_window() {
        let mut w = window();
        w.push(sample(0, 70));
        w.push(sample(1000, 72));
        w.push(sample(2000, 68));

        assert_eq!(w.len(), 3);
        let view = w.view(true);
        assert_eq!(view.min, Some(68));
        assert_eq!(view.max, Some(72));
        assert_eq!(view.current, Some(68));
        assert_eq!(view.min_bound, Some(2000 - 60_000));
        assert_eq!(view.retention_bound, Some(2000 - 63_000));
    }

    #[test]
    fn prunes_prefix_older_than_retention_bound() {
        let mut w = window();
        for t in (0..=70_000).step_by(1000) {
            w.push(sample(t, 60));
        }
        // cutoff = 70_000 - 63_000 = 7_000, inclusive
        let first = w.samples().next().unwrap();
        assert_eq!(first.t_ms, 7000);
        assert_eq!(w.len(), 64);
    }

    #[test]
    fn retained_set_matches_cutoff_for_any_sequence() {
        let times = [0, 500, 1500, 30_000, 62_999, 63_000, 64_000, 90_000, 126_500, 127_000];
        let mut w = window();
        for (i, &t) in times.iter().enumerate() {
            w.push(sample(t, 50 + i as u16));
            let cutoff = t - 63_000;
            let expected: Vec<i64> = times[..=i].iter().copied().filter(|&x| x >= cutoff).collect();
            let actual: Vec<i64> = w.samples().map(|s| s.t_ms).collect();
            assert_eq!(actual, expected, "after pushing t={t}");
        }
    }

    #[test]
    fn slack_samples_are_kept_but_not_displayed() {
        let mut w = window();
        w.push(sample(0, 200));
        w.push(sample(61_000, 80));
        w.push(sample(62_000, 90));

        // t=0 sits between the display and retention bounds.
        assert_eq!(w.len(), 3);
        let view = w.view(true);
        assert_eq!(view.min, Some(80));
        assert_eq!(view.max, Some(90));
    }

    #[test]
    fn window_extremes_never_exceed_buffer_extremes() {
        let mut w = window();
        let rates = [90, 40, 120, 65, 70, 71, 180, 55];
        for (i, &r) in rates.iter().enumerate() {
            w.push(sample(i as i64 * 20_000, r));
            let view = w.view(true);
            let buf_min = w.samples().map(|s| s.rate).min().unwrap();
            let buf_max = w.samples().map(|s| s.rate).max().unwrap();
            assert!(view.min.unwrap() >= buf_min);
            assert!(view.max.unwrap() <= buf_max);
        }
    }

    #[test]
    fn empty_window_has_no_view() {
        let view = window().view(true);
        assert_eq!(view, WindowView::default());
    }

    #[test]
    fn disconnected_withholds_current_rate() {
        let mut w = window();
        w.push(sample(0, 70));
        let view = w.view(false);
        assert_eq!(view.current, None);
        assert_eq!(view.max, Some(70));
    }

    #[test]
    fn extreme_timestamps_saturate() {
        let mut w = window();
        w.push(Sample::from_secs(-1e300, 60, None));
        assert_eq!(w.samples().next().unwrap().t_ms, i64::MIN);

        let view = w.view(true);
        assert_eq!(view.min_bound, Some(i64::MIN));
        assert_eq!(view.retention_bound, Some(i64::MIN));
        assert_eq!(view.current, Some(60));

        w.push(sample(1000, 70));
        assert_eq!(w.len(), 1);
        assert_eq!(w.view(true).max, Some(70));
    }

    #[test]
    fn seconds_are_rounded_to_millis() {
        let s = Sample::from_secs(1700000000.25, 60, Some(true));
        assert_eq!(s.t_ms, 1_700_000_000_250);
        assert_eq!(s.contact, Some(true));
    }
}
