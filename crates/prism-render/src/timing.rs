// SPDX-License-Identifier: CEPL-1.0
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Samples kept for the rolling GPU average.
pub const GPU_TIMING_WINDOW: usize = 30;

/// How often CPU/GPU aggregates are surfaced.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Rolling window of GPU frame times in milliseconds. Oldest sample is
/// evicted first once the window is full.
#[derive(Debug, Clone)]
pub struct GpuTimings {
    samples: VecDeque<f64>,
    cap: usize,
}

impl Default for GpuTimings {
    fn default() -> Self {
        Self::with_capacity(GPU_TIMING_WINDOW)
    }
}

impl GpuTimings {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            samples: VecDeque::with_capacity(cap + 1),
            cap,
        }
    }

    pub fn push(&mut self, ms: f64) {
        self.samples.push_back(ms);
        while self.samples.len() > self.cap {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub cpu_fps: f64,
    /// Mean over the rolling window; `None` until the first timestamp pair lands.
    pub gpu_ms: Option<f64>,
    pub gpu_samples: usize,
}

/// Counts presented frames and emits a report once per `REPORT_INTERVAL`.
#[derive(Debug, Clone)]
pub struct FrameStats {
    frames: u32,
    window_start: Instant,
    interval: Duration,
}

impl FrameStats {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
            interval: REPORT_INTERVAL,
        }
    }

    pub fn frame_presented(&mut self, now: Instant, gpu: &GpuTimings) -> Option<FrameReport> {
        self.frames = self.frames.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }
        let report = FrameReport {
            cpu_fps: self.frames as f64 / elapsed.as_secs_f64(),
            gpu_ms: gpu.mean(),
            gpu_samples: gpu.len(),
        };
        self.frames = 0;
        self.window_start = now;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest_after_cap() {
        let mut t = GpuTimings::default();
        for i in 0..31 {
            t.push(i as f64);
        }
        assert_eq!(t.len(), 30);
        assert_eq!(t.samples().next(), Some(1.0));
        assert_eq!(t.samples().last(), Some(30.0));
    }

    #[test]
    fn test_mean_over_window() {
        let mut t = GpuTimings::with_capacity(3);
        assert_eq!(t.mean(), None);
        t.push(1.0);
        t.push(2.0);
        t.push(3.0);
        t.push(7.0);
        assert_eq!(t.mean(), Some(4.0));
    }

    #[test]
    fn test_stats_report_every_interval() {
        let start = Instant::now();
        let mut stats = FrameStats::new(start);
        let mut gpu = GpuTimings::default();
        gpu.push(2.0);

        for i in 1..100u64 {
            assert!(stats
                .frame_presented(start + Duration::from_millis(i * 10), &gpu)
                .is_none());
        }
        let report = stats
            .frame_presented(start + Duration::from_secs(2), &gpu)
            .expect("report after two seconds");
        assert_eq!(report.cpu_fps, 50.0);
        assert_eq!(report.gpu_ms, Some(2.0));
        assert_eq!(report.gpu_samples, 1);

        // window restarts
        assert!(stats
            .frame_presented(start + Duration::from_millis(2100), &gpu)
            .is_none());
    }
}
