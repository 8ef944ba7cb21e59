use anyhow::{Context, Result};
use ats_daq::{
    log_board_info, tui::Status, AcqError, AcquisitionRequest, AcquisitionResult, CancelToken,
    Conf, Digitizer, Outcome, SimulatedDigitizer,
};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::{fs::File, path::PathBuf, str::FromStr};
use time::OffsetDateTime;

/// Averaged waveform acquisition on a simulated digitizer
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the number of records
    #[arg(long)]
    records: Option<usize>,

    /// Override the number of averages per record
    #[arg(long)]
    averages: Option<usize>,

    /// Override the number of ignored leading triggers
    #[arg(long)]
    ignore: Option<usize>,

    /// Log to the terminal instead of showing the status display
    #[arg(long, default_value_t = false)]
    no_tui: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Conf::load(&cli.config)?;
    if let Some(n) = cli.records {
        config.capture_settings.n_records = n;
    }
    if let Some(n) = cli.averages {
        config.capture_settings.n_averages = n;
    }
    if let Some(n) = cli.ignore {
        config.capture_settings.n_ignore_trig = n;
    }
    let use_tui = config.run_settings.tui && !cli.no_tui;

    init_logging(&config, use_tui)?;

    let setup = config.board_setup();
    log_board_info(setup.model);
    let request = config.request();
    let digitizer = Digitizer::new(config.simulator(), setup);
    let external_trigger = config.board_settings.external_trigger;

    let results = if use_tui {
        let mut terminal = ratatui::init();
        let mut status = Status::new(
            config.board_settings.model,
            config.run_settings.repeat,
            CancelToken::new(),
        );
        let app_result = status.run(&mut terminal, digitizer, request, external_trigger);
        ratatui::restore();
        app_result?.1
    } else {
        run_headless(digitizer, &request, external_trigger, config.run_settings.repeat)
    };

    let mut failed = None;
    for (run, result) in results.into_iter().enumerate() {
        match result {
            Ok(Outcome::Completed(result)) => log_traces(run, &result, &config),
            Ok(Outcome::Cancelled {
                buffers_completed,
                records_averaged,
                partial,
            }) => {
                warn!(
                    "Run {} cancelled after {} buffers ({} records averaged)",
                    run + 1,
                    buffers_completed,
                    records_averaged
                );
                log_traces(run, &partial, &config);
            }
            Err(e) => {
                error!("Run {} failed: {}", run + 1, e);
                failed = Some(e);
            }
        }
    }

    match failed {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn log_traces(run: usize, result: &AcquisitionResult, config: &Conf) {
    for trace in &result.traces {
        let range = config.range_for(trace.channel).unwrap_or(1.0);
        let volts = trace
            .trimmed(config.capture_settings.n_samples)
            .to_volts(range);
        let mean = volts.records.mean().unwrap_or(0.0);
        let min = volts.records.iter().copied().fold(f64::INFINITY, f64::min);
        let max = volts
            .records
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        info!(
            "Run {} channel {}: {:?} samples, mean {:.4} V, min {:.4} V, max {:.4} V",
            run + 1,
            trace.channel,
            volts.records.dim(),
            mean,
            min,
            max
        );
    }
}

fn run_headless(
    mut digitizer: Digitizer<SimulatedDigitizer>,
    request: &AcquisitionRequest,
    external_trigger: bool,
    repeat: usize,
) -> Vec<Result<Outcome, AcqError>> {
    let cancel = CancelToken::new();
    let mut results = Vec::with_capacity(repeat);
    for run in 0..repeat {
        info!("Starting run {}/{}", run + 1, repeat);
        let result = digitizer.acquire(request, external_trigger, &cancel, |fraction| {
            info!("Run {}: {:.0}%", run + 1, 100.0 * fraction)
        });
        let failed = result.is_err();
        results.push(result);
        if failed {
            break;
        }
    }
    results
}

fn init_logging(config: &Conf, use_tui: bool) -> Result<()> {
    let level = LevelFilter::from_str(&config.run_settings.log_level)
        .map_err(|_| AcqError::Config(format!("bad log level {}", config.run_settings.log_level)))?;
    let log_config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .build();

    std::fs::create_dir_all(&config.run_settings.log_dir)
        .with_context(|| format!("creating {}", config.run_settings.log_dir))?;
    let now = OffsetDateTime::now_utc();
    let log_file = PathBuf::from(&config.run_settings.log_dir).join(format!(
        "ats_daq_{}{:02}{:02}_{:02}{:02}{:02}.log",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    ));

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![WriteLogger::new(
        level,
        log_config.clone(),
        File::create(&log_file).with_context(|| format!("creating {}", log_file.display()))?,
    )];
    // the status display owns the terminal
    if !use_tui {
        loggers.push(TermLogger::new(
            level,
            log_config,
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}
