use crate::{
    post_process, AcqError, AcquisitionPlan, AcquisitionRequest, AcquisitionResult, Averager,
    AveragerParams, BoardModel, BufferPool, CodeScale, DmaBuffer, DmaDevice, RecordGeometry,
    Result, TransferStats, DEFAULT_POOL_DEPTH,
};
use log::{debug, error, info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Cooperative stop flag, checked once per buffer.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Used for the first buffer of an externally triggered capture, which
    /// may have to wait for the trigger source to fire.
    pub first_buffer: Duration,
    pub steady_state: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            first_buffer: Duration::from_secs(185),
            steady_state: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Armed,
    Running,
    Completed,
    Aborted,
}

#[derive(Debug)]
pub enum Outcome {
    Completed(AcquisitionResult),
    /// Stopped early. `partial` is post-processed the same way as a full
    /// result, so slots that received fewer than `n_average` records read
    /// low in proportion.
    Cancelled {
        buffers_completed: usize,
        records_averaged: usize,
        partial: AcquisitionResult,
    },
}

/// Static description of the board the engine drives.
#[derive(Clone, Debug, PartialEq)]
pub struct BoardSetup {
    pub model: BoardModel,
    /// Enabled channels in interleave order.
    pub channels: Vec<u32>,
    pub timeouts: Timeouts,
    pub pool_depth: usize,
}

impl BoardSetup {
    pub fn new(model: BoardModel, channels: Vec<u32>) -> Self {
        Self {
            model,
            channels,
            timeouts: Timeouts::default(),
            pool_depth: DEFAULT_POOL_DEPTH,
        }
    }
}

/// Keeps the hardware transfer scoped: whatever way the capture region is
/// left, dropping the guard aborts the transfer and returns the buffers
/// hardware still held to the pool.
pub struct CaptureGuard<'a, D: DmaDevice + ?Sized> {
    device: &'a mut D,
    pool: &'a mut BufferPool,
}

impl<'a, D: DmaDevice + ?Sized> CaptureGuard<'a, D> {
    pub fn new(device: &'a mut D, pool: &'a mut BufferPool) -> Self {
        Self { device, pool }
    }

    /// Post every buffer, then start the capture.
    pub fn arm(&mut self) -> Result<()> {
        self.pool.post_all(&mut *self.device)?;
        self.device.start_capture()?;
        info!("Start capturing");
        Ok(())
    }

    pub fn wait_next(&mut self, index: usize, timeout: Duration) -> Result<&DmaBuffer> {
        self.pool.wait_next(&mut *self.device, index, timeout)
    }

    pub fn repost(&mut self, index: usize) -> Result<()> {
        self.pool.repost(&mut *self.device, index)?;
        Ok(())
    }
}

impl<D: DmaDevice + ?Sized> Drop for CaptureGuard<'_, D> {
    fn drop(&mut self) {
        match self.device.abort_capture() {
            Ok(buffers) => self.pool.reclaim(buffers),
            Err(e) => error!("Failed to abort capture: {}", e),
        }
    }
}

/// Owns one device and runs acquisitions on it, one at a time.
pub struct Digitizer<D: DmaDevice> {
    device: D,
    setup: BoardSetup,
    pool: BufferPool,
    state: AcquisitionState,
}

impl<D: DmaDevice> Digitizer<D> {
    pub fn new(device: D, setup: BoardSetup) -> Self {
        let pool = BufferPool::new(setup.pool_depth);
        Self {
            device,
            setup,
            pool,
            state: AcquisitionState::Idle,
        }
    }

    pub fn setup(&self) -> &BoardSetup {
        &self.setup
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn plan(&self, request: &AcquisitionRequest) -> Result<AcquisitionPlan> {
        let spec = self.setup.model.spec();
        if self.setup.channels.is_empty() {
            return Err(AcqError::Planning("no channel enabled".into()));
        }
        let geometry = RecordGeometry::from_spec(&spec, self.setup.channels.len());
        AcquisitionPlan::new(request, &geometry)
    }

    /// Run one acquisition to completion, cancellation, or failure.
    ///
    /// `progress` receives the completed fraction after every buffer. The
    /// hardware transfer is always aborted before this returns.
    pub fn acquire<F>(
        &mut self,
        request: &AcquisitionRequest,
        external_trigger: bool,
        cancel: &CancelToken,
        mut progress: F,
    ) -> Result<Outcome>
    where
        F: FnMut(f64),
    {
        self.state = AcquisitionState::Idle;
        let plan = self.plan(request)?;

        self.pool.ensure_allocated(&plan);
        let mut averager = Averager::new(AveragerParams::from_plan(&plan));
        self.device.configure_capture(&plan)?;

        let mut stats = TransferStats::new();
        let run = {
            let mut capture = CaptureGuard::new(&mut self.device, &mut self.pool);
            self.state = AcquisitionState::Armed;
            match capture.arm() {
                Ok(()) => {
                    self.state = AcquisitionState::Running;
                    stream_buffers(
                        &mut capture,
                        &plan,
                        &self.setup.timeouts,
                        external_trigger,
                        cancel,
                        &mut averager,
                        &mut stats,
                        &mut progress,
                    )
                }
                Err(e) => Err(e),
            }
        };
        stats.summary().log();

        let finish = |averager: &Averager| {
            let scale = CodeScale::new(self.setup.model.bits_per_sample());
            let traces = post_process(
                averager.accumulator(),
                averager.params(),
                &scale,
                &self.setup.channels,
            );
            AcquisitionResult { plan, traces }
        };
        match run {
            Ok(None) => {
                if !averager.is_complete() {
                    warn!(
                        "Averaging incomplete: {:?} for {:?}",
                        averager.state(),
                        averager.params()
                    );
                }
                let result = finish(&averager);
                self.state = AcquisitionState::Completed;
                Ok(Outcome::Completed(result))
            }
            Ok(Some(buffers_completed)) => {
                let records_averaged = averager.state().records_completed;
                info!(
                    "Acquisition cancelled after {} buffers, {} of {} records averaged",
                    buffers_completed,
                    records_averaged,
                    averager.params().records_to_average()
                );
                let partial = finish(&averager);
                self.state = AcquisitionState::Aborted;
                Ok(Outcome::Cancelled {
                    buffers_completed,
                    records_averaged,
                    partial,
                })
            }
            Err(e) => {
                self.state = AcquisitionState::Aborted;
                error!("Acquisition aborted: {}", e);
                Err(e)
            }
        }
    }
}

/// The wait/process/repost cycle. Returns `Some(buffers_completed)` if
/// cancelled.
#[allow(clippy::too_many_arguments)]
fn stream_buffers<D, F>(
    capture: &mut CaptureGuard<'_, D>,
    plan: &AcquisitionPlan,
    timeouts: &Timeouts,
    external_trigger: bool,
    cancel: &CancelToken,
    averager: &mut Averager,
    stats: &mut TransferStats,
    progress: &mut F,
) -> Result<Option<usize>>
where
    D: DmaDevice + ?Sized,
    F: FnMut(f64),
{
    let n_buffers = plan.buffers_per_acquisition;
    for buffer_index in 0..n_buffers {
        if cancel.is_cancelled() {
            return Ok(Some(buffer_index));
        }
        let timeout = if buffer_index == 0 && external_trigger {
            timeouts.first_buffer
        } else {
            timeouts.steady_state
        };

        let buffer = capture.wait_next(buffer_index, timeout)?;
        stats.record_buffer(buffer.size_bytes(), plan.records_per_buffer);
        let used = averager.accumulate_samples(buffer.samples());

        let fraction = (buffer_index + 1) as f64 / n_buffers as f64;
        debug!(
            "Buffer {}/{}: {} records averaged ({:.0}%)",
            buffer_index + 1,
            n_buffers,
            used,
            100.0 * fraction
        );
        progress(fraction);

        capture.repost(buffer_index)?;
    }
    Ok(None)
}
