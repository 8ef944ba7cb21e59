use crate::{AveragerParams, AcquisitionPlan};
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Maps unsigned sample codes onto a signed full-scale value in about
/// `[-1, 1]`. Codes narrower than their storage word are MSB-aligned, so the
/// zero point and range are scaled by the unused low bits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CodeScale {
    pub bit_shift: u32,
    pub code_zero: f64,
    pub code_range: f64,
}

impl CodeScale {
    pub fn new(bits_per_sample: u8) -> Self {
        let bits = bits_per_sample as u32;
        let bit_shift = (8 - bits % 8) % 8;
        let code_zero = ((1u64 << (bits - 1)) as f64 - 0.5) * (1u64 << bit_shift) as f64;
        Self {
            bit_shift,
            code_zero,
            code_range: code_zero,
        }
    }

    pub fn normalize(&self, mean_code: f64) -> f64 {
        (mean_code - self.code_zero) / self.code_range
    }
}

/// Averaged, normalized waveform of one channel, one row per record.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelTrace {
    pub channel: u32,
    pub records: Array2<f64>,
}

impl ChannelTrace {
    /// All records back to back, length `n_record * samples_per_record`.
    pub fn flattened(&self) -> Array1<f64> {
        self.records.iter().copied().collect()
    }

    pub fn record(&self, index: usize) -> ArrayView1<'_, f64> {
        self.records.row(index)
    }

    /// Drop the padding the hardware's record granularity added.
    pub fn trimmed(&self, n_samples: usize) -> Self {
        let n_samples = n_samples.min(self.records.ncols());
        Self {
            channel: self.channel,
            records: self
                .records
                .slice_axis(Axis(1), (0..n_samples).into())
                .to_owned(),
        }
    }

    /// Scale from full-scale units to volts for an input range of `±range`.
    pub fn to_volts(&self, range: f64) -> Self {
        Self {
            channel: self.channel,
            records: &self.records * range,
        }
    }
}

/// Divide by `n_average`, remove the code offset, and split the interleaved
/// accumulator into one `[n_record, samples_per_record]` trace per channel.
pub fn post_process(
    accumulator: &[f64],
    params: &AveragerParams,
    scale: &CodeScale,
    channels: &[u32],
) -> Vec<ChannelTrace> {
    debug_assert_eq!(channels.len(), params.channel_count);
    debug_assert_eq!(accumulator.len(), params.accumulator_len());

    let n_average = params.n_average as f64;
    let cc = params.channel_count;
    let spr = params.samples_per_record;
    channels
        .iter()
        .enumerate()
        .map(|(lane, &channel)| {
            let records = Array2::from_shape_fn((params.n_record, spr), |(r, s)| {
                scale.normalize(accumulator[(r * spr + s) * cc + lane] / n_average)
            });
            ChannelTrace { channel, records }
        })
        .collect()
}

/// Everything the caller gets back from a completed acquisition.
#[derive(Clone, Debug)]
pub struct AcquisitionResult {
    pub plan: AcquisitionPlan,
    pub traces: Vec<ChannelTrace>,
}

impl AcquisitionResult {
    pub fn trace(&self, channel: u32) -> Option<&ChannelTrace> {
        self.traces.iter().find(|t| t.channel == channel)
    }
}
