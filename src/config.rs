use crate::{
    AcqError, AcquisitionRequest, BoardModel, BoardSetup, Result, SimWaveform, SimulatedDigitizer,
    Timeouts,
};
use confique::Config;
use serde::Deserialize;
use std::{collections::HashMap, path::Path, time::Duration};

#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub run_settings: RunSettings,
    #[config(nested)]
    pub board_settings: BoardSettings,
    #[config(nested)]
    pub capture_settings: CaptureSettings,
    #[config(nested)]
    pub timeout_settings: TimeoutSettings,
    #[config(nested)]
    pub simulation_settings: SimulationSettings,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    #[config(default = "info")]
    pub log_level: String,
    #[config(default = "logs")]
    pub log_dir: String,
    /// Number of acquisitions to run back to back.
    #[config(default = 1)]
    pub repeat: usize,
    #[config(default = true)]
    pub tui: bool,
}

#[derive(Config, Debug, Clone)]
pub struct BoardSettings {
    pub model: BoardModel,
    pub en_chans: ChannelConfig,
    /// Input range in volts, `±range` maps to full scale.
    pub input_range: InputRangeConfig,
    #[config(default = false)]
    pub external_trigger: bool,
    #[config(default = 10)]
    pub pool_depth: usize,
}

#[derive(Config, Debug, Clone)]
pub struct CaptureSettings {
    #[config(default = 1024)]
    pub n_samples: usize,
    #[config(default = 1)]
    pub n_records: usize,
    #[config(default = 1)]
    pub n_averages: usize,
    #[config(default = 0)]
    pub n_ignore_trig: usize,
}

#[derive(Config, Debug, Clone)]
pub struct TimeoutSettings {
    #[config(default = 185000)]
    pub first_buffer_ms: u64,
    #[config(default = 5000)]
    pub steady_state_ms: u64,
}

#[derive(Config, Debug, Clone)]
pub struct SimulationSettings {
    #[config(default = 0.0)]
    pub offset: f64,
    #[config(default = 0.5)]
    pub amplitude: f64,
    #[config(default = 64.0)]
    pub period_samples: f64,
    #[config(default = 0.05)]
    pub noise: f64,
    #[config(default = 0)]
    pub trigger_interval_us: u64,
    pub max_triggers: Option<usize>,
    #[config(default = 1000)]
    pub overflow_slack_ms: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ChannelConfig {
    All(bool),
    List(Vec<u32>),
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum InputRangeConfig {
    Global(f64),
    PerChannel(HashMap<String, f64>),
}

impl Conf {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conf = Conf::builder()
            .file(path)
            .load()
            .map_err(|e| AcqError::Config(format!("{}: {}", path.display(), e)))?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        let spec = self.board_settings.model.spec();
        let channels = self.enabled_channels();
        if channels.is_empty() {
            return Err(AcqError::Config("no channel enabled".into()));
        }
        if let Some(&ch) = channels.iter().find(|&&ch| ch as usize >= spec.channel_count) {
            return Err(AcqError::Config(format!(
                "channel {} does not exist on {} ({} channels)",
                ch, self.board_settings.model, spec.channel_count
            )));
        }
        for &ch in &channels {
            match self.range_for(ch) {
                Some(range) if range > 0.0 => {}
                Some(range) => {
                    return Err(AcqError::Config(format!(
                        "input range {} for channel {} is not positive",
                        range, ch
                    )))
                }
                None => {
                    return Err(AcqError::Config(format!(
                        "no input range given for channel {}",
                        ch
                    )))
                }
            }
        }
        let c = &self.capture_settings;
        if c.n_records == 0 || c.n_averages == 0 || c.n_samples == 0 {
            return Err(AcqError::Config(
                "n_samples, n_records and n_averages must be at least 1".into(),
            ));
        }
        if self.board_settings.pool_depth == 0 {
            return Err(AcqError::Config("pool_depth must be at least 1".into()));
        }
        if self.run_settings.repeat == 0 {
            return Err(AcqError::Config("repeat must be at least 1".into()));
        }
        Ok(())
    }

    /// Enabled channels, ascending, which is also their interleave order.
    pub fn enabled_channels(&self) -> Vec<u32> {
        match &self.board_settings.en_chans {
            ChannelConfig::All(true) => {
                (0..self.board_settings.model.spec().channel_count as u32).collect()
            }
            ChannelConfig::All(false) => Vec::new(),
            ChannelConfig::List(list) => {
                let mut list = list.clone();
                list.sort_unstable();
                list.dedup();
                list
            }
        }
    }

    pub fn range_for(&self, channel: u32) -> Option<f64> {
        match &self.board_settings.input_range {
            InputRangeConfig::Global(range) => Some(*range),
            InputRangeConfig::PerChannel(map) => map.get(&channel.to_string()).copied(),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            first_buffer: Duration::from_millis(self.timeout_settings.first_buffer_ms),
            steady_state: Duration::from_millis(self.timeout_settings.steady_state_ms),
        }
    }

    pub fn board_setup(&self) -> BoardSetup {
        BoardSetup {
            model: self.board_settings.model,
            channels: self.enabled_channels(),
            timeouts: self.timeouts(),
            pool_depth: self.board_settings.pool_depth,
        }
    }

    pub fn request(&self) -> AcquisitionRequest {
        let c = &self.capture_settings;
        AcquisitionRequest {
            n_record: c.n_records,
            n_average: c.n_averages,
            n_ignore_trig: c.n_ignore_trig,
            n_samples: c.n_samples,
        }
    }

    pub fn simulator(&self) -> SimulatedDigitizer {
        let s = &self.simulation_settings;
        let waveform = SimWaveform {
            offset: s.offset,
            amplitude: s.amplitude,
            period_samples: s.period_samples,
            noise: s.noise,
        };
        let sim = SimulatedDigitizer::with_waveform(
            self.board_settings.model.bits_per_sample(),
            waveform,
        )
        .trigger_interval(Duration::from_micros(s.trigger_interval_us))
        .overflow_slack(Duration::from_millis(s.overflow_slack_ms));
        match s.max_triggers {
            Some(n) => sim.max_triggers(n),
            None => sim,
        }
    }
}
