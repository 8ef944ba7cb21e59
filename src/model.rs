use log::info;
use serde::Deserialize;
use std::fmt;

/// Supported digitizer models and their record-geometry constraints.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardModel {
    #[serde(alias = "ats9870")]
    ATS9870,
    #[serde(alias = "ats9360")]
    ATS9360,
}

/// Hardware limits the planner has to respect for one model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HardwareSpec {
    /// Smallest record the board will capture, in samples.
    pub min_record_size: usize,
    /// Record sizes must be a multiple of this many samples.
    pub record_size_granularity: usize,
    pub bits_per_sample: u8,
    pub channel_count: usize,
    /// Full scale of the external trigger input, in volts.
    pub ext_trigger_range: f64,
}

const ATS9870_SPEC: HardwareSpec = HardwareSpec {
    min_record_size: 256,
    record_size_granularity: 64,
    bits_per_sample: 8,
    channel_count: 2,
    ext_trigger_range: 5.0,
};

const ATS9360_SPEC: HardwareSpec = HardwareSpec {
    min_record_size: 256,
    record_size_granularity: 128,
    bits_per_sample: 12,
    channel_count: 2,
    ext_trigger_range: 2.5,
};

impl BoardModel {
    pub fn spec(self) -> HardwareSpec {
        match self {
            BoardModel::ATS9870 => ATS9870_SPEC,
            BoardModel::ATS9360 => ATS9360_SPEC,
        }
    }

    pub fn bits_per_sample(self) -> u8 {
        self.spec().bits_per_sample
    }

    /// Samples narrower than a byte boundary are stored in the next
    /// whole-byte container.
    pub fn bytes_per_sample(self) -> usize {
        (self.bits_per_sample() as usize + 7) / 8
    }
}

impl fmt::Display for BoardModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardModel::ATS9870 => write!(f, "ATS9870"),
            BoardModel::ATS9360 => write!(f, "ATS9360"),
        }
    }
}

pub fn log_board_info(model: BoardModel) {
    let spec = model.spec();
    let mut param_log = String::new();

    param_log.push_str(&format!("ModelName: {}\n", model));
    param_log.push_str(&format!("NumCh: {}\n", spec.channel_count));
    param_log.push_str(&format!("ADC_Nbit: {}\n", spec.bits_per_sample));
    param_log.push_str(&format!("BytesPerSample: {}\n", model.bytes_per_sample()));
    param_log.push_str(&format!("MinRecordSize: {}\n", spec.min_record_size));
    param_log.push_str(&format!(
        "RecordSizeGranularity: {}\n",
        spec.record_size_granularity
    ));
    param_log.push_str(&format!("ExtTrigRange: {} V", spec.ext_trigger_range));

    info!("Digitizer parameters:\n{}", param_log);
}
