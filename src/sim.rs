use crate::{AcquisitionPlan, CodeScale, DeviceError, DmaBuffer, DmaDevice, SampleData};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use rand::Rng;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Produces the raw code for `(record, sample, channel)`.
pub type RecordGenerator = Arc<dyn Fn(usize, usize, usize) -> u16 + Send + Sync>;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Clone, Debug, PartialEq)]
pub struct SimWaveform {
    /// Full-scale units, `[-1, 1]`.
    pub offset: f64,
    pub amplitude: f64,
    /// Sine period in samples.
    pub period_samples: f64,
    /// Peak uniform noise in full-scale units.
    pub noise: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct CaptureGeometry {
    samples_per_record: usize,
    channel_count: usize,
    records_per_buffer: usize,
    buffers_per_acquisition: usize,
    bytes_per_sample: usize,
    bytes_per_buffer: usize,
}

struct Engine {
    abort: Arc<AtomicBool>,
    handle: JoinHandle<Vec<DmaBuffer>>,
}

/// Software DMA engine. Once capture starts a thread fills posted buffers in
/// order; if software stops reposting it reports an overflow.
pub struct SimulatedDigitizer {
    generator: RecordGenerator,
    trigger_interval: Duration,
    max_triggers: Option<usize>,
    overflow_slack: Duration,
    geometry: Option<CaptureGeometry>,
    posted: (Sender<DmaBuffer>, Receiver<DmaBuffer>),
    filled: (
        Sender<Result<DmaBuffer, DeviceError>>,
        Receiver<Result<DmaBuffer, DeviceError>>,
    ),
    engine: Option<Engine>,
}

impl SimulatedDigitizer {
    pub fn new(generator: RecordGenerator) -> Self {
        Self {
            generator,
            trigger_interval: Duration::ZERO,
            max_triggers: None,
            overflow_slack: Duration::from_secs(1),
            geometry: None,
            posted: unbounded(),
            filled: unbounded(),
            engine: None,
        }
    }

    /// Sine wave plus noise on every channel, channel `c` phase-shifted by a
    /// quarter period per channel.
    pub fn with_waveform(bits_per_sample: u8, waveform: SimWaveform) -> Self {
        let scale = CodeScale::new(bits_per_sample);
        let max_code = ((1u32 << bits_per_sample) - 1) as f64;
        let shift = scale.bit_shift;
        let generator: RecordGenerator = Arc::new(move |_record: usize, sample: usize, channel: usize| {
            let phase = channel as f64 * std::f64::consts::FRAC_PI_2;
            let mut value = waveform.offset
                + waveform.amplitude
                    * (std::f64::consts::TAU * sample as f64 / waveform.period_samples + phase)
                        .sin();
            if waveform.noise > 0.0 {
                value += rand::rng().random_range(-waveform.noise..=waveform.noise);
            }
            let unshifted = scale.code_zero / (1u32 << shift) as f64;
            let code = (unshifted + value * unshifted).round().clamp(0.0, max_code);
            (code as u16) << shift
        });
        Self::new(generator)
    }

    /// Delay between consecutive triggers.
    pub fn trigger_interval(mut self, interval: Duration) -> Self {
        self.trigger_interval = interval;
        self
    }

    /// Stop triggering after `n` records, as if the trigger source went quiet.
    pub fn max_triggers(mut self, n: usize) -> Self {
        self.max_triggers = Some(n);
        self
    }

    /// How long the engine tolerates having no posted buffer before it
    /// declares an overflow.
    pub fn overflow_slack(mut self, slack: Duration) -> Self {
        self.overflow_slack = slack;
        self
    }

    pub fn is_capturing(&self) -> bool {
        self.engine.is_some()
    }

    fn stop_engine(&mut self) -> Result<Vec<DmaBuffer>, DeviceError> {
        let mut returned = Vec::new();
        if let Some(engine) = self.engine.take() {
            engine.abort.store(true, Ordering::SeqCst);
            match engine.handle.join() {
                Ok(held) => returned.extend(held),
                Err(_) => return Err(DeviceError::Other("DMA engine thread panicked".into())),
            }
        }
        returned.extend(self.posted.1.try_iter());
        returned.extend(self.filled.1.try_iter().filter_map(Result::ok));
        Ok(returned)
    }
}

impl DmaDevice for SimulatedDigitizer {
    fn configure_capture(&mut self, plan: &AcquisitionPlan) -> Result<(), DeviceError> {
        if self.engine.is_some() {
            return Err(DeviceError::AlreadyRunning);
        }
        self.geometry = Some(CaptureGeometry {
            samples_per_record: plan.samples_per_record,
            channel_count: plan.channel_count,
            records_per_buffer: plan.records_per_buffer,
            buffers_per_acquisition: plan.buffers_per_acquisition,
            bytes_per_sample: plan.bytes_per_sample,
            bytes_per_buffer: plan.bytes_per_buffer(),
        });
        debug!(
            "Configured capture: {} samples x {} records per buffer, {} buffers",
            plan.samples_per_record, plan.records_per_buffer, plan.buffers_per_acquisition
        );
        Ok(())
    }

    fn post_buffer(&mut self, buffer: DmaBuffer) -> Result<(), DeviceError> {
        let geometry = self.geometry.ok_or(DeviceError::NotConfigured)?;
        if buffer.size_bytes() != geometry.bytes_per_buffer
            || buffer.bytes_per_sample() != geometry.bytes_per_sample
        {
            return Err(DeviceError::InvalidBuffer {
                id: buffer.id(),
                reason: format!(
                    "{} bytes of {}-byte samples, expected {} bytes of {}-byte samples",
                    buffer.size_bytes(),
                    buffer.bytes_per_sample(),
                    geometry.bytes_per_buffer,
                    geometry.bytes_per_sample
                ),
            });
        }
        self.posted
            .0
            .send(buffer)
            .map_err(|_| DeviceError::Disconnected)
    }

    fn wait_buffer_complete(
        &mut self,
        id: usize,
        timeout: Duration,
    ) -> Result<Option<DmaBuffer>, DeviceError> {
        if self.engine.is_none() {
            return Err(DeviceError::NotConfigured);
        }
        match self.filled.1.recv_timeout(timeout) {
            Ok(Ok(buffer)) => {
                if buffer.id() != id {
                    warn!("Expected buffer {} but buffer {} completed", id, buffer.id());
                }
                Ok(Some(buffer))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Disconnected),
        }
    }

    fn start_capture(&mut self) -> Result<(), DeviceError> {
        let geometry = self.geometry.ok_or(DeviceError::NotConfigured)?;
        if self.engine.is_some() {
            return Err(DeviceError::AlreadyRunning);
        }
        let abort = Arc::new(AtomicBool::new(false));
        let engine = DmaEngine {
            geometry,
            generator: Arc::clone(&self.generator),
            trigger_interval: self.trigger_interval,
            max_triggers: self.max_triggers,
            overflow_slack: self.overflow_slack,
            posted: self.posted.1.clone(),
            filled: self.filled.0.clone(),
            abort: Arc::clone(&abort),
        };
        let handle = thread::spawn(move || engine.run());
        self.engine = Some(Engine { abort, handle });
        Ok(())
    }

    fn abort_capture(&mut self) -> Result<Vec<DmaBuffer>, DeviceError> {
        let returned = self.stop_engine()?;
        debug!("Capture aborted, {} buffers returned", returned.len());
        Ok(returned)
    }
}

impl Drop for SimulatedDigitizer {
    fn drop(&mut self) {
        if let Err(e) = self.stop_engine() {
            warn!("Failed to stop simulated DMA engine: {}", e);
        }
    }
}

/// State moved onto the engine thread.
struct DmaEngine {
    geometry: CaptureGeometry,
    generator: RecordGenerator,
    trigger_interval: Duration,
    max_triggers: Option<usize>,
    overflow_slack: Duration,
    posted: Receiver<DmaBuffer>,
    filled: Sender<Result<DmaBuffer, DeviceError>>,
    abort: Arc<AtomicBool>,
}

impl DmaEngine {
    /// Returns the buffers it still holds when told to stop.
    fn run(self) -> Vec<DmaBuffer> {
        let g = self.geometry;
        let mut record = 0;
        for _ in 0..g.buffers_per_acquisition {
            let Some(mut buffer) = self.next_posted(record) else {
                return Vec::new();
            };
            for r in 0..g.records_per_buffer {
                if self.max_triggers.is_some_and(|max| record >= max) {
                    self.idle_until_abort();
                    return vec![buffer];
                }
                if !self.trigger_interval.is_zero() {
                    thread::sleep(self.trigger_interval);
                }
                if self.abort.load(Ordering::SeqCst) {
                    return vec![buffer];
                }
                self.fill_record(&mut buffer, r, record);
                record += 1;
            }
            if self.filled.send(Ok(buffer)).is_err() {
                return Vec::new();
            }
        }
        Vec::new()
    }

    fn next_posted(&self, record: usize) -> Option<DmaBuffer> {
        let started = Instant::now();
        loop {
            match self.posted.recv_timeout(POLL_INTERVAL) {
                Ok(buffer) => return Some(buffer),
                Err(RecvTimeoutError::Timeout) => {
                    if self.abort.load(Ordering::SeqCst) {
                        return None;
                    }
                    if started.elapsed() > self.overflow_slack {
                        let _ = self.filled.send(Err(DeviceError::BufferOverflow { record }));
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn idle_until_abort(&self) {
        while !self.abort.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn fill_record(&self, buffer: &mut DmaBuffer, slot: usize, record: usize) {
        let g = self.geometry;
        let record_len = g.samples_per_record * g.channel_count;
        let base = slot * record_len;
        for s in 0..g.samples_per_record {
            for c in 0..g.channel_count {
                let idx = base + s * g.channel_count + c;
                let code = (self.generator)(record, s, c);
                match buffer.data_mut() {
                    SampleData::U8(v) => v[idx] = code as u8,
                    SampleData::U16(v) => v[idx] = code,
                }
            }
        }
    }
}
