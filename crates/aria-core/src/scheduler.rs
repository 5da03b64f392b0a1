//! Gapless playback scheduling over an abstract audio output context.

use aria_native_utils::audio::AudioBuffer;
use std::collections::HashSet;
use tokio::sync::oneshot;

pub type SourceId = u64;

/// The output side of the audio device, abstracted to its clock and its
/// ability to start a buffer at a point on that clock.
///
/// Implementations must fire the completion sender when the source finishes
/// playing or is stopped, and never before its last frame is rendered.
pub trait AudioContext: Send {
    /// Seconds elapsed on the context's own monotonic clock.
    fn now(&self) -> f64;

    /// Schedules `buffer` to begin at `start` seconds on the context clock.
    fn start_source(&mut self, buffer: AudioBuffer, start: f64) -> (SourceId, oneshot::Receiver<()>);

    /// Immediately stops every source that has not finished.
    fn stop_all_sources(&mut self);

    /// Releases the output device. The context is unusable afterwards.
    fn close(&mut self);
}

pub type ContextFactory = Box<dyn FnMut() -> anyhow::Result<Box<dyn AudioContext>> + Send>;

/// Schedules decoded buffers back-to-back on a shared clock.
///
/// The cursor always points at the end of the last scheduled buffer, so
/// consecutive enqueues produce zero-gap, zero-overlap playback; a cursor in
/// the past snaps forward to the clock. The in-flight set is mutated only by
/// [`PlaybackScheduler::mark_finished`] and [`PlaybackScheduler::stop_all`].
pub struct PlaybackScheduler {
    factory: ContextFactory,
    ctx: Option<Box<dyn AudioContext>>,
    cursor: f64,
    in_flight: HashSet<SourceId>,
}

impl PlaybackScheduler {
    pub fn new(factory: ContextFactory) -> Self {
        Self {
            factory,
            ctx: None,
            cursor: 0.0,
            in_flight: HashSet::new(),
        }
    }

    /// Acquires the output context if none is open. A fresh context starts
    /// with the cursor at zero.
    pub fn ensure_context(&mut self) -> anyhow::Result<()> {
        if self.ctx.is_none() {
            self.ctx = Some((self.factory)()?);
            self.cursor = 0.0;
        }
        Ok(())
    }

    /// Schedules a buffer at `max(cursor, now)` and advances the cursor by
    /// its duration. The returned receiver fires when this buffer finishes.
    pub fn enqueue(
        &mut self,
        buffer: AudioBuffer,
    ) -> anyhow::Result<(SourceId, oneshot::Receiver<()>)> {
        self.ensure_context()?;
        let Some(ctx) = self.ctx.as_mut() else {
            anyhow::bail!("audio output context unavailable");
        };
        let start = self.cursor.max(ctx.now());
        let duration = buffer.duration();
        let (id, done) = ctx.start_source(buffer, start);
        self.cursor = start + duration;
        self.in_flight.insert(id);
        Ok((id, done))
    }

    /// Removes a finished source. Returns false for ids already removed by
    /// [`PlaybackScheduler::stop_all`] or a stale completion.
    pub fn mark_finished(&mut self, id: SourceId) -> bool {
        self.in_flight.remove(&id)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stops everything still sounding, empties the in-flight set, and
    /// rewinds the cursor so the next enqueue starts at "now".
    pub fn stop_all(&mut self) {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.stop_all_sources();
        }
        self.in_flight.clear();
        self.cursor = 0.0;
    }

    /// Stops playback and releases the output device. The next enqueue will
    /// lazily acquire a fresh context.
    pub fn close_context(&mut self) {
        self.stop_all();
        if let Some(mut ctx) = self.ctx.take() {
            ctx.close();
        }
    }

    pub fn has_context(&self) -> bool {
        self.ctx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeState {
        now: f64,
        next_id: SourceId,
        starts: Vec<(SourceId, f64, f64)>, // id, start, duration
        stopped: bool,
        closed: bool,
        opens: usize,
    }

    #[derive(Clone)]
    struct FakeContext {
        state: Arc<Mutex<FakeState>>,
    }

    impl AudioContext for FakeContext {
        fn now(&self) -> f64 {
            self.state.lock().unwrap().now
        }

        fn start_source(
            &mut self,
            buffer: AudioBuffer,
            start: f64,
        ) -> (SourceId, oneshot::Receiver<()>) {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let id = state.next_id;
            state.starts.push((id, start, buffer.duration()));
            let (tx, rx) = oneshot::channel();
            tx.send(()).unwrap();
            (id, rx)
        }

        fn stop_all_sources(&mut self) {
            self.state.lock().unwrap().stopped = true;
        }

        fn close(&mut self) {
            self.state.lock().unwrap().closed = true;
        }
    }

    fn scheduler_with_state() -> (PlaybackScheduler, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let factory_state = state.clone();
        let scheduler = PlaybackScheduler::new(Box::new(move || {
            factory_state.lock().unwrap().opens += 1;
            Ok(Box::new(FakeContext {
                state: factory_state.clone(),
            }) as Box<dyn AudioContext>)
        }));
        (scheduler, state)
    }

    fn buffer_secs(seconds: f64) -> AudioBuffer {
        let frames = (seconds * 24000.0).round() as usize;
        AudioBuffer::new(vec![vec![0.0; frames]], 24000)
    }

    #[test]
    fn buffers_schedule_back_to_back() {
        let (mut scheduler, state) = scheduler_with_state();
        state.lock().unwrap().now = 5.0;

        scheduler.enqueue(buffer_secs(1.0)).unwrap();
        scheduler.enqueue(buffer_secs(0.5)).unwrap();
        scheduler.enqueue(buffer_secs(0.25)).unwrap();

        let starts: Vec<f64> = state.lock().unwrap().starts.iter().map(|s| s.1).collect();
        assert_eq!(starts, vec![5.0, 6.0, 6.5]);
        assert_eq!(scheduler.in_flight(), 3);
    }

    #[test]
    fn cursor_snaps_forward_when_clock_passes_it() {
        let (mut scheduler, state) = scheduler_with_state();
        scheduler.enqueue(buffer_secs(1.0)).unwrap();

        // The first buffer ended at t=1 but the clock is already at t=3.
        state.lock().unwrap().now = 3.0;
        scheduler.enqueue(buffer_secs(1.0)).unwrap();

        let starts = &state.lock().unwrap().starts;
        assert_eq!(starts[1].1, 3.0);
    }

    #[test]
    fn stop_all_clears_set_and_resets_cursor() {
        let (mut scheduler, state) = scheduler_with_state();
        state.lock().unwrap().now = 2.0;
        scheduler.enqueue(buffer_secs(4.0)).unwrap();
        assert!(!scheduler.is_idle());

        scheduler.stop_all();
        assert!(scheduler.is_idle());
        assert!(state.lock().unwrap().stopped);

        // Next enqueue starts at the current clock, not the stale cursor.
        state.lock().unwrap().now = 2.5;
        scheduler.enqueue(buffer_secs(1.0)).unwrap();
        assert_eq!(state.lock().unwrap().starts[1].1, 2.5);
    }

    #[test]
    fn completion_removes_exactly_one_source() {
        let (mut scheduler, _state) = scheduler_with_state();
        let (id, _done) = scheduler.enqueue(buffer_secs(1.0)).unwrap();

        assert!(scheduler.mark_finished(id));
        assert!(!scheduler.mark_finished(id));
        assert!(scheduler.is_idle());
    }

    #[test]
    fn context_is_lazily_reacquired_after_close() {
        let (mut scheduler, state) = scheduler_with_state();
        scheduler.enqueue(buffer_secs(1.0)).unwrap();
        assert!(scheduler.has_context());

        scheduler.close_context();
        assert!(!scheduler.has_context());
        assert!(state.lock().unwrap().closed);

        state.lock().unwrap().now = 9.0;
        scheduler.enqueue(buffer_secs(1.0)).unwrap();
        let state = state.lock().unwrap();
        assert_eq!(state.opens, 2);
        // Fresh context, fresh cursor: scheduled at the new clock's now.
        assert_eq!(state.starts[1].1, 9.0);
    }
}
