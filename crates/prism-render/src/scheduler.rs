// SPDX-License-Identifier: CEPL-1.0
//! Ring of frames in flight.
//!
//! Each slot owns a command buffer, a fence and two semaphores on the
//! backend side. The scheduler only tracks which slot is current and what
//! state each one is in; all GPU calls go through [`FrameBackend`].

use anyhow::Result;
use std::time::Instant;
use tracing::{debug, trace};

use crate::timing::{FrameReport, FrameStats, GpuTimings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    /// Surface no longer matches the swapchain.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Done { suboptimal: bool },
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled; the command buffer may be re-recorded.
    Idle,
    Recording,
    /// Fence unsignaled until the GPU finishes the submission.
    Submitted,
}

/// GPU side of one scheduler iteration. Implementations must keep the
/// slot's fence signaled until `record_frame` resets it.
pub trait FrameBackend {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire_image(&mut self, slot: usize) -> Result<Acquire>;
    /// Resets the slot fence and command buffer, then records the frame.
    fn record_frame(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit_frame(&mut self, slot: usize) -> Result<()>;
    fn present_frame(&mut self, slot: usize, image_index: u32) -> Result<Present>;
    /// Drains the device and rebuilds every swapchain-derived resource.
    fn recreate_swapchain(&mut self) -> Result<()>;
    /// Non-blocking. `None` when the slot's timestamps are not available yet.
    fn poll_gpu_time(&mut self, slot: usize) -> Result<Option<f64>>;
    fn wait_idle(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    Presented {
        slot: usize,
        image_index: u32,
        report: Option<FrameReport>,
    },
    /// Swapchain went stale; it was rebuilt and nothing more happens this iteration.
    Abandoned { slot: usize },
}

pub struct FrameScheduler {
    current: usize,
    slots: Vec<SlotState>,
    timings: GpuTimings,
    stats: FrameStats,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize, now: Instant) -> Self {
        let n = frames_in_flight.max(1);
        Self {
            current: 0,
            slots: vec![SlotState::Idle; n],
            timings: GpuTimings::default(),
            stats: FrameStats::new(now),
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    pub fn timings(&self) -> &GpuTimings {
        &self.timings
    }

    pub fn run_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B, now: Instant) -> Result<FrameOutcome> {
        let n = self.slots.len();
        let cur = self.current;

        backend.wait_for_slot(cur)?;
        self.slots[cur] = SlotState::Idle;

        let image_index = match backend.acquire_image(cur)? {
            Acquire::Image { index, suboptimal } => {
                if suboptimal {
                    trace!("slot {cur}: acquire suboptimal");
                }
                index
            }
            Acquire::Stale => {
                debug!("slot {cur}: acquire stale, recreating swapchain");
                backend.recreate_swapchain()?;
                return Ok(FrameOutcome::Abandoned { slot: cur });
            }
        };

        self.slots[cur] = SlotState::Recording;
        backend.record_frame(cur, image_index)?;
        backend.submit_frame(cur)?;
        self.slots[cur] = SlotState::Submitted;

        match backend.present_frame(cur, image_index)? {
            Present::Done { suboptimal } => {
                if suboptimal {
                    trace!("slot {cur}: present suboptimal");
                }
            }
            Present::Stale => {
                debug!("slot {cur}: present stale, recreating swapchain");
                backend.recreate_swapchain()?;
                return Ok(FrameOutcome::Abandoned { slot: cur });
            }
        }

        self.current = (cur + 1) % n;

        // The slot just submitted; a pair that is not ready yet is skipped.
        let prev = (self.current + n - 1) % n;
        if let Some(ms) = backend.poll_gpu_time(prev)? {
            self.timings.push(ms);
        }
        let report = self.stats.frame_presented(now, &self.timings);

        Ok(FrameOutcome::Presented {
            slot: cur,
            image_index,
            report,
        })
    }

    /// Blocks until nothing is in flight. Call before destroying slot objects.
    pub fn shutdown<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        backend.wait_idle()?;
        self.slots.iter_mut().for_each(|s| *s = SlotState::Idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Wait(usize),
        Acquire(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate,
        Poll(usize),
        Idle,
    }

    struct MockBackend {
        events: Vec<Event>,
        fence_signaled: Vec<bool>,
        acquire_script: VecDeque<Acquire>,
        present_script: VecDeque<Present>,
        next_image: u32,
        extent: (u32, u32),
        recorded_extents: Vec<(u32, u32)>,
        gpu_times: VecDeque<Option<f64>>,
    }

    impl MockBackend {
        fn new(n: usize) -> Self {
            Self {
                events: Vec::new(),
                fence_signaled: vec![true; n],
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                next_image: 0,
                extent: (800, 600),
                recorded_extents: Vec::new(),
                gpu_times: VecDeque::new(),
            }
        }

        fn in_flight(&self) -> usize {
            self.fence_signaled.iter().filter(|s| !**s).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.events.push(Event::Wait(slot));
            // the GPU finishes whatever the slot had pending
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
            self.events.push(Event::Acquire(slot));
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            Ok(Acquire::Image { index, suboptimal: false })
        }

        fn record_frame(&mut self, slot: usize, image_index: u32) -> Result<()> {
            assert!(self.fence_signaled[slot], "re-recording slot {slot} while in flight");
            self.fence_signaled[slot] = false;
            self.recorded_extents.push(self.extent);
            self.events.push(Event::Record(slot, image_index));
            Ok(())
        }

        fn submit_frame(&mut self, slot: usize) -> Result<()> {
            self.events.push(Event::Submit(slot));
            Ok(())
        }

        fn present_frame(&mut self, slot: usize, image_index: u32) -> Result<Present> {
            self.events.push(Event::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(Present::Done { suboptimal: false }))
        }

        fn recreate_swapchain(&mut self) -> Result<()> {
            self.events.push(Event::Recreate);
            self.extent = (1024, 768);
            Ok(())
        }

        fn poll_gpu_time(&mut self, slot: usize) -> Result<Option<f64>> {
            self.events.push(Event::Poll(slot));
            Ok(self.gpu_times.pop_front().flatten())
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.events.push(Event::Idle);
            self.fence_signaled.iter_mut().for_each(|s| *s = true);
            Ok(())
        }
    }

    fn frame_times(start: Instant) -> impl Iterator<Item = Instant> {
        (0u64..).map(move |i| start + Duration::from_millis(i * 16))
    }

    #[test]
    fn test_slot_index_sequence() {
        let start = Instant::now();
        let mut sched = FrameScheduler::new(3, start);
        let mut backend = MockBackend::new(3);
        let mut seen = Vec::new();

        for now in frame_times(start).take(10) {
            seen.push(sched.current_slot());
            sched.run_frame(&mut backend, now).unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_at_most_one_submission_per_slot() {
        let start = Instant::now();
        let mut sched = FrameScheduler::new(3, start);
        let mut backend = MockBackend::new(3);

        for now in frame_times(start).take(20) {
            sched.run_frame(&mut backend, now).unwrap();
            assert!(backend.in_flight() <= 3);
        }
        // every slot was waited on before it was recorded again
        let mut last_wait = [None; 3];
        for (i, e) in backend.events.iter().enumerate() {
            match e {
                Event::Wait(s) => last_wait[*s] = Some(i),
                Event::Record(s, _) => assert!(last_wait[*s].is_some_and(|w| w < i)),
                _ => {}
            }
        }
    }

    #[test]
    fn test_stale_acquire_abandons_iteration() {
        let start = Instant::now();
        let mut sched = FrameScheduler::new(3, start);
        let mut backend = MockBackend::new(3);
        let mut times = frame_times(start);

        sched.run_frame(&mut backend, times.next().unwrap()).unwrap();
        sched.run_frame(&mut backend, times.next().unwrap()).unwrap();
        assert_eq!(sched.current_slot(), 2);

        backend.acquire_script.push_back(Acquire::Stale);
        backend.events.clear();
        let outcome = sched.run_frame(&mut backend, times.next().unwrap()).unwrap();

        assert_eq!(outcome, FrameOutcome::Abandoned { slot: 2 });
        assert_eq!(backend.events, vec![Event::Wait(2), Event::Acquire(2), Event::Recreate]);
        // fence untouched, slot still usable
        assert!(backend.fence_signaled[2]);
        assert_eq!(sched.slot_state(2), SlotState::Idle);
        assert_eq!(sched.current_slot(), 2);

        backend.events.clear();
        let outcome = sched.run_frame(&mut backend, times.next().unwrap()).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { slot: 2, .. }));
        assert!(backend.events.contains(&Event::Submit(2)));
        assert_eq!(backend.recorded_extents.last(), Some(&(1024, 768)));
        assert_eq!(sched.current_slot(), 0);
    }

    #[test]
    fn test_stale_present_recreates_without_advancing() {
        let start = Instant::now();
        let mut sched = FrameScheduler::new(3, start);
        let mut backend = MockBackend::new(3);

        backend.present_script.push_back(Present::Stale);
        let outcome = sched.run_frame(&mut backend, start).unwrap();

        assert_eq!(outcome, FrameOutcome::Abandoned { slot: 0 });
        assert_eq!(backend.events.last(), Some(&Event::Recreate));
        assert!(!backend.events.iter().any(|e| matches!(e, Event::Poll(_))));
        assert_eq!(sched.current_slot(), 0);
        assert_eq!(sched.slot_state(0), SlotState::Submitted);
    }

    #[test]
    fn test_suboptimal_is_tolerated() {
        let start = Instant::now();
        let mut sched = FrameScheduler::new(3, start);
        let mut backend = MockBackend::new(3);

        backend
            .acquire_script
            .push_back(Acquire::Image { index: 1, suboptimal: true });
        backend.present_script.push_back(Present::Done { suboptimal: true });
        let outcome = sched.run_frame(&mut backend, start).unwrap();

        assert!(matches!(outcome, FrameOutcome::Presented { slot: 0, image_index: 1, .. }));
        assert!(!backend.events.contains(&Event::Recreate));
    }

    #[test]
    fn test_polls_previous_slot_and_skips_missing_results() {
        let start = Instant::now();
        let mut sched = FrameScheduler::new(3, start);
        let mut backend = MockBackend::new(3);
        backend.gpu_times.extend([None, Some(2.0), Some(4.0)]);

        for now in frame_times(start).take(3) {
            sched.run_frame(&mut backend, now).unwrap();
        }
        let polled: Vec<_> = backend
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Poll(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(polled, vec![0, 1, 2]);
        assert_eq!(sched.timings().len(), 2);
        assert_eq!(sched.timings().mean(), Some(3.0));
    }

    #[test]
    fn test_report_after_interval() {
        let start = Instant::now();
        let mut sched = FrameScheduler::new(3, start);
        let mut backend = MockBackend::new(3);
        backend.gpu_times.push_back(Some(1.5));

        let first = sched.run_frame(&mut backend, start + Duration::from_millis(10)).unwrap();
        assert!(matches!(first, FrameOutcome::Presented { report: None, .. }));

        let later = sched.run_frame(&mut backend, start + Duration::from_secs(2)).unwrap();
        match later {
            FrameOutcome::Presented { report: Some(r), .. } => {
                assert_eq!(r.cpu_fps, 1.0);
                assert_eq!(r.gpu_ms, Some(1.5));
            }
            other => panic!("expected a report, got {other:?}"),
        }
    }

    #[test]
    fn test_shutdown_waits_for_idle() {
        let start = Instant::now();
        let mut sched = FrameScheduler::new(3, start);
        let mut backend = MockBackend::new(3);
        sched.run_frame(&mut backend, start).unwrap();
        assert_eq!(sched.slot_state(0), SlotState::Submitted);

        sched.shutdown(&mut backend).unwrap();
        assert_eq!(backend.events.last(), Some(&Event::Idle));
        assert_eq!(backend.in_flight(), 0);
        assert_eq!(sched.slot_state(0), SlotState::Idle);
    }
}
