//! Pipeline performance counters
//!
//! Throughput is reported two ways: `rolling_fps` over the last
//! `window` completed frames, which tracks current load, and `average_fps`
//! over the whole run since the last reset.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-stage counters snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    pub name: String,
    pub enabled: bool,
    /// Successful invocations
    pub frames: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Share of total stage time spent in this stage, 0-100
    pub time_percent: f64,
}

/// Pipeline counters snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub name: String,
    /// Frames that went through every stage
    pub total_frames: u64,
    /// Frames aborted by a failing stage
    pub failed_frames: u64,
    /// Throughput over the recent window
    pub rolling_fps: f64,
    /// Throughput since the last reset
    pub average_fps: f64,
    /// Mean end-to-end time over the recent window
    pub avg_frame_time_ms: f64,
    pub stages: Vec<StageStats>,
}

/// Fixed-size ring of samples
#[derive(Debug)]
struct RollingWindow {
    values: Vec<f64>,
    index: usize,
    count: usize,
}

impl RollingWindow {
    fn new(size: usize) -> Self {
        Self {
            values: vec![0.0; size.max(1)],
            index: 0,
            count: 0,
        }
    }

    fn add(&mut self, value: f64) {
        self.values[self.index] = value;
        self.index = (self.index + 1) % self.values.len();
        if self.count < self.values.len() {
            self.count += 1;
        }
    }

    fn clear(&mut self) {
        self.index = 0;
        self.count = 0;
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.values[..self.count].iter().sum::<f64>() / self.count as f64
    }
}

#[derive(Debug, Default, Clone)]
struct StageCounters {
    frames: u64,
    failures: u64,
    total: Duration,
    max: Duration,
}

/// Mutable counters owned by a pipeline
#[derive(Debug)]
pub(crate) struct StatsCollector {
    window: usize,
    started: Instant,
    total_frames: u64,
    failed_frames: u64,
    completions: VecDeque<Instant>,
    frame_times: RollingWindow,
    stages: Vec<(String, StageCounters)>,
}

impl StatsCollector {
    pub(crate) fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            started: Instant::now(),
            total_frames: 0,
            failed_frames: 0,
            completions: VecDeque::with_capacity(window),
            frame_times: RollingWindow::new(window),
            stages: Vec::new(),
        }
    }

    pub(crate) fn window(&self) -> usize {
        self.window
    }

    pub(crate) fn add_stage(&mut self, name: &str) {
        self.stages.push((name.to_string(), StageCounters::default()));
    }

    pub(crate) fn clear_stages(&mut self) {
        self.stages.clear();
    }

    pub(crate) fn record_stage(&mut self, name: &str, elapsed: Duration, ok: bool) {
        if let Some((_, counters)) = self.stages.iter_mut().find(|(n, _)| n == name) {
            if ok {
                counters.frames += 1;
                counters.total += elapsed;
                counters.max = counters.max.max(elapsed);
            } else {
                counters.failures += 1;
            }
        }
    }

    pub(crate) fn record_frame(&mut self, elapsed: Duration) {
        self.record_frame_at(Instant::now(), elapsed);
    }

    fn record_frame_at(&mut self, finished: Instant, elapsed: Duration) {
        self.total_frames += 1;
        self.frame_times.add(elapsed.as_secs_f64() * 1000.0);
        if self.completions.len() == self.window {
            self.completions.pop_front();
        }
        self.completions.push_back(finished);
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed_frames += 1;
    }

    pub(crate) fn reset(&mut self) {
        self.started = Instant::now();
        self.total_frames = 0;
        self.failed_frames = 0;
        self.completions.clear();
        self.frame_times.clear();
        for (_, counters) in &mut self.stages {
            *counters = StageCounters::default();
        }
    }

    /// `(n - 1) / (newest - oldest)` over the completion window
    fn rolling_fps(&self) -> f64 {
        match (self.completions.front(), self.completions.back()) {
            (Some(oldest), Some(newest)) if self.completions.len() >= 2 => {
                let span = newest.duration_since(*oldest).as_secs_f64();
                if span > 0.0 {
                    (self.completions.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub(crate) fn snapshot(&self, name: &str, enabled: impl Fn(&str) -> bool) -> PipelineStats {
        let stage_total: Duration = self.stages.iter().map(|(_, c)| c.total).sum();
        let stage_total = stage_total.as_secs_f64();

        let stages = self
            .stages
            .iter()
            .map(|(stage, c)| {
                let total = c.total.as_secs_f64();
                StageStats {
                    name: stage.clone(),
                    enabled: enabled(stage),
                    frames: c.frames,
                    failures: c.failures,
                    avg_latency_ms: if c.frames > 0 {
                        total * 1000.0 / c.frames as f64
                    } else {
                        0.0
                    },
                    max_latency_ms: c.max.as_secs_f64() * 1000.0,
                    time_percent: if stage_total > 0.0 {
                        total / stage_total * 100.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        let run_secs = self.started.elapsed().as_secs_f64();

        PipelineStats {
            name: name.to_string(),
            total_frames: self.total_frames,
            failed_frames: self.failed_frames,
            rolling_fps: self.rolling_fps(),
            average_fps: if run_secs > 0.0 {
                self.total_frames as f64 / run_secs
            } else {
                0.0
            },
            avg_frame_time_ms: self.frame_times.average(),
            stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window() {
        let mut window = RollingWindow::new(3);
        window.add(1.0);
        window.add(2.0);
        window.add(3.0);
        assert_eq!(window.average(), 2.0);

        window.add(6.0);
        assert!((window.average() - 11.0 / 3.0).abs() < 1e-9);

        window.clear();
        assert_eq!(window.average(), 0.0);
    }

    #[test]
    fn test_rolling_fps_uses_recent_window_only() {
        let mut stats = StatsCollector::new(5);
        let t0 = Instant::now();

        // A slow start: one frame per second
        for i in 0..5 {
            stats.record_frame_at(t0 + Duration::from_secs(i), Duration::from_millis(1));
        }
        assert!((stats.rolling_fps() - 1.0).abs() < 1e-9);

        // Then 10 frames 100ms apart; only the last 5 count
        let fast_start = t0 + Duration::from_secs(10);
        for i in 0..10 {
            stats.record_frame_at(
                fast_start + Duration::from_millis(100 * i),
                Duration::from_millis(1),
            );
        }
        assert!((stats.rolling_fps() - 10.0).abs() < 1e-6);
        assert_eq!(stats.total_frames, 15);
    }

    #[test]
    fn test_rolling_fps_needs_two_frames() {
        let mut stats = StatsCollector::new(5);
        assert_eq!(stats.rolling_fps(), 0.0);
        stats.record_frame(Duration::from_millis(1));
        assert_eq!(stats.rolling_fps(), 0.0);
    }

    #[test]
    fn test_stage_latency_and_share() {
        let mut stats = StatsCollector::new(5);
        stats.add_stage("capture");
        stats.add_stage("magnify");

        stats.record_stage("capture", Duration::from_millis(10), true);
        stats.record_stage("magnify", Duration::from_millis(20), true);
        stats.record_stage("magnify", Duration::from_millis(40), true);
        stats.record_stage("magnify", Duration::from_millis(5), false);

        let snapshot = stats.snapshot("main", |_| true);
        let capture = &snapshot.stages[0];
        let magnify = &snapshot.stages[1];

        assert_eq!(capture.frames, 1);
        assert!((capture.avg_latency_ms - 10.0).abs() < 1e-6);
        assert_eq!(magnify.frames, 2);
        assert_eq!(magnify.failures, 1);
        assert!((magnify.avg_latency_ms - 30.0).abs() < 1e-6);
        assert!((magnify.max_latency_ms - 40.0).abs() < 1e-6);
        assert!((capture.time_percent - 100.0 / 7.0).abs() < 1e-6);
        assert!((capture.time_percent + magnify.time_percent - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut stats = StatsCollector::new(3);
        stats.add_stage("a");
        stats.record_stage("a", Duration::from_millis(3), true);
        stats.record_frame(Duration::from_millis(3));
        stats.record_failure();

        stats.reset();
        let snapshot = stats.snapshot("p", |_| true);
        assert_eq!(snapshot.total_frames, 0);
        assert_eq!(snapshot.failed_frames, 0);
        assert_eq!(snapshot.stages[0].frames, 0);
        assert_eq!(snapshot.stages.len(), 1);
    }
}
