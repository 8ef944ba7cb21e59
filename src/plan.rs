use crate::{AcqError, HardwareSpec, Result};
use log::info;

pub const MIB: usize = 1024 * 1024;

/// Captures up to this size go into a single buffer.
pub const SINGLE_BUFFER_LIMIT: usize = 16 * MIB;

/// Captures at or above this size use buffers of `MAX_BUFFER_BYTES`.
pub const LARGE_CAPTURE_LIMIT: usize = 256 * MIB;

pub const MAX_BUFFER_BYTES: usize = 16 * MIB;

/// What the caller asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquisitionRequest {
    /// Number of distinct records (averaging slots).
    pub n_record: usize,
    /// Repetitions folded into each slot.
    pub n_average: usize,
    /// Leading triggers thrown away before averaging starts.
    pub n_ignore_trig: usize,
    /// Requested samples per record, before hardware rounding.
    pub n_samples: usize,
}

/// Per-capture record geometry supplied by the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordGeometry {
    pub record_size_granularity: usize,
    pub min_record_size: usize,
    pub channel_count: usize,
    pub bytes_per_sample: usize,
}

impl RecordGeometry {
    pub fn from_spec(spec: &HardwareSpec, channel_count: usize) -> Self {
        Self {
            record_size_granularity: spec.record_size_granularity,
            min_record_size: spec.min_record_size,
            channel_count,
            bytes_per_sample: (spec.bits_per_sample as usize + 7) / 8,
        }
    }
}

/// DMA buffer layout for one acquisition. Immutable once built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquisitionPlan {
    pub samples_per_record: usize,
    pub records_per_buffer: usize,
    pub buffers_per_acquisition: usize,
    pub bytes_per_record: usize,
    pub bytes_per_sample: usize,
    pub channel_count: usize,
    pub n_record: usize,
    pub n_average: usize,
    pub n_ignore_trig: usize,
}

impl AcquisitionPlan {
    pub fn new(request: &AcquisitionRequest, geometry: &RecordGeometry) -> Result<Self> {
        if request.n_record == 0 {
            return Err(AcqError::Planning("number of records must be >= 1".into()));
        }
        if request.n_average == 0 {
            return Err(AcqError::Planning("number of averages must be >= 1".into()));
        }
        if geometry.channel_count == 0 {
            return Err(AcqError::Planning("at least one channel must be enabled".into()));
        }
        if !matches!(geometry.bytes_per_sample, 1 | 2) {
            return Err(AcqError::Planning(format!(
                "unsupported sample width: {} bytes",
                geometry.bytes_per_sample
            )));
        }
        if geometry.record_size_granularity == 0 {
            return Err(AcqError::Planning("record size granularity must be >= 1".into()));
        }

        let granularity = geometry.record_size_granularity;
        let samples_per_record = request
            .n_samples
            .div_ceil(granularity)
            .saturating_mul(granularity)
            .max(geometry.min_record_size);
        if samples_per_record == 0 {
            return Err(AcqError::Planning("record resolves to zero samples".into()));
        }
        let overflow = || AcqError::Planning("acquisition size overflows".into());
        let bytes_per_record = geometry
            .bytes_per_sample
            .checked_mul(samples_per_record)
            .ok_or_else(overflow)?;
        let total_records = request
            .n_record
            .checked_mul(request.n_average)
            .and_then(|n| n.checked_add(request.n_ignore_trig))
            .ok_or_else(overflow)?;
        if total_records == 0 {
            return Err(AcqError::Planning("nothing to acquire".into()));
        }
        let bytes_per_record_all_channels = bytes_per_record
            .checked_mul(geometry.channel_count)
            .ok_or_else(overflow)?;
        let total_bytes = total_records
            .checked_mul(bytes_per_record_all_channels)
            .ok_or_else(overflow)?;

        let bytes_per_buffer = buffer_bytes_for(total_bytes);
        let records_per_buffer = bytes_per_buffer
            .div_ceil(bytes_per_record_all_channels)
            .max(1);
        let buffers_per_acquisition = total_records.div_ceil(records_per_buffer);

        let plan = Self {
            samples_per_record,
            records_per_buffer,
            buffers_per_acquisition,
            bytes_per_record,
            bytes_per_sample: geometry.bytes_per_sample,
            channel_count: geometry.channel_count,
            n_record: request.n_record,
            n_average: request.n_average,
            n_ignore_trig: request.n_ignore_trig,
        };
        plan.log();
        Ok(plan)
    }

    /// Bytes of one DMA buffer across all enabled channels.
    pub fn bytes_per_buffer(&self) -> usize {
        self.bytes_per_record * self.records_per_buffer * self.channel_count
    }

    /// Records the hardware is told to capture. May exceed what the
    /// averager consumes; the tail of the last buffer is dropped.
    pub fn records_per_acquisition(&self) -> usize {
        self.records_per_buffer * self.buffers_per_acquisition
    }

    pub fn records_needed(&self) -> usize {
        self.n_record * self.n_average + self.n_ignore_trig
    }

    fn log(&self) {
        info!(
            "records: {}, averages: {}, ignored triggers: {}",
            self.n_record, self.n_average, self.n_ignore_trig
        );
        info!("Bytes per sample: {}", self.bytes_per_sample);
        info!("Samples per record: {}", self.samples_per_record);
        info!("Records per buffer: {}", self.records_per_buffer);
        info!("Buffers per acquisition: {}", self.buffers_per_acquisition);
        info!(
            "Records per acquisition: {} ({} used)",
            self.records_per_acquisition(),
            self.records_needed()
        );
    }
}

/// Buffer size heuristic: small captures go in one buffer, huge ones are
/// capped, and the middle interpolates geometrically between the two.
fn buffer_bytes_for(total_bytes: usize) -> usize {
    if total_bytes <= SINGLE_BUFFER_LIMIT {
        total_bytes
    } else if total_bytes >= LARGE_CAPTURE_LIMIT {
        MAX_BUFFER_BYTES
    } else {
        ((total_bytes as f64) * (MIB as f64)).sqrt() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(channels: usize, bytes_per_sample: usize) -> RecordGeometry {
        RecordGeometry {
            record_size_granularity: 64,
            min_record_size: 256,
            channel_count: channels,
            bytes_per_sample,
        }
    }

    fn request(n_record: usize, n_average: usize, n_ignore: usize, n_samples: usize) -> AcquisitionRequest {
        AcquisitionRequest {
            n_record,
            n_average,
            n_ignore_trig: n_ignore,
            n_samples,
        }
    }

    #[test]
    fn record_size_rounds_up_to_granularity() {
        let plan = AcquisitionPlan::new(&request(1, 1, 0, 1000), &geometry(1, 1)).unwrap();
        assert_eq!(plan.samples_per_record, 1024);
        assert_eq!(plan.bytes_per_record, 1024);
    }

    #[test]
    fn record_size_is_raised_to_minimum() {
        let plan = AcquisitionPlan::new(&request(1, 1, 0, 10), &geometry(2, 2)).unwrap();
        assert_eq!(plan.samples_per_record, 256);
        assert_eq!(plan.bytes_per_record, 512);
    }

    #[test]
    fn small_capture_fits_one_buffer() {
        let plan = AcquisitionPlan::new(&request(4, 10, 2, 256), &geometry(2, 1)).unwrap();
        assert_eq!(plan.records_per_buffer, 42);
        assert_eq!(plan.buffers_per_acquisition, 1);
        assert_eq!(plan.bytes_per_buffer(), 42 * 256 * 2);
    }

    #[test]
    fn exactly_16_mib_stays_in_one_buffer() {
        assert_eq!(buffer_bytes_for(16 * MIB), 16 * MIB);
        // 1024 records of 16 KiB
        let plan = AcquisitionPlan::new(&request(1, 1024, 0, 16384), &geometry(1, 1)).unwrap();
        assert_eq!(plan.bytes_per_buffer(), 16 * MIB);
        assert_eq!(plan.buffers_per_acquisition, 1);
    }

    #[test]
    fn exactly_256_mib_caps_buffer_at_16_mib() {
        assert_eq!(buffer_bytes_for(256 * MIB), 16 * MIB);
        let plan = AcquisitionPlan::new(&request(1, 16384, 0, 16384), &geometry(1, 1)).unwrap();
        assert_eq!(plan.records_per_buffer, 1024);
        assert_eq!(plan.buffers_per_acquisition, 16);
    }

    #[test]
    fn intermediate_sizes_interpolate_geometrically() {
        assert_eq!(buffer_bytes_for(64 * MIB), 8 * MIB);
        assert_eq!(buffer_bytes_for(300 * MIB), 16 * MIB);
    }

    #[test]
    fn plan_covers_every_requested_record() {
        for (n_record, n_average, n_ignore) in [(1, 1, 0), (3, 7, 1), (100, 1000, 5), (7, 3000, 13)] {
            let plan = AcquisitionPlan::new(
                &request(n_record, n_average, n_ignore, 2048),
                &geometry(2, 2),
            )
            .unwrap();
            assert!(plan.records_per_buffer >= 1);
            assert!(plan.records_per_acquisition() >= n_record * n_average + n_ignore);
            assert!(plan.records_per_acquisition() - plan.records_needed() < plan.records_per_buffer);
        }
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert!(matches!(
            AcquisitionPlan::new(&request(0, 1, 0, 256), &geometry(1, 1)),
            Err(AcqError::Planning(_))
        ));
        assert!(matches!(
            AcquisitionPlan::new(&request(1, 0, 0, 256), &geometry(1, 1)),
            Err(AcqError::Planning(_))
        ));
        assert!(matches!(
            AcquisitionPlan::new(&request(1, 1, 0, 256), &geometry(0, 1)),
            Err(AcqError::Planning(_))
        ));
        assert!(matches!(
            AcquisitionPlan::new(&request(1, 1, 0, 256), &geometry(1, 4)),
            Err(AcqError::Planning(_))
        ));
    }

    #[test]
    fn huge_records_are_a_planning_error() {
        let err = AcquisitionPlan::new(&request(1, 1, 0, usize::MAX / 2), &geometry(2, 2))
            .unwrap_err();
        assert!(matches!(err, AcqError::Planning(msg) if msg.contains("overflows")));

        let err = AcquisitionPlan::new(&request(1, 1, 0, usize::MAX / 3), &geometry(4, 1))
            .unwrap_err();
        assert!(matches!(err, AcqError::Planning(_)));
    }
}
