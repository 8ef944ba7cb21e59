use ats_daq::{
    AcqError, AcquisitionRequest, AcquisitionState, BoardModel, BoardSetup, BufferState,
    CancelToken, CodeScale, DeviceError, Digitizer, Outcome, SimWaveform, SimulatedDigitizer,
};
use std::{sync::Arc, thread, time::Duration};

fn setup(model: BoardModel, channels: Vec<u32>) -> BoardSetup {
    let mut setup = BoardSetup::new(model, channels);
    setup.timeouts.steady_state = Duration::from_secs(30);
    setup.pool_depth = 4;
    setup
}

fn request(n_record: usize, n_average: usize, n_ignore_trig: usize, n_samples: usize) -> AcquisitionRequest {
    AcquisitionRequest {
        n_record,
        n_average,
        n_ignore_trig,
        n_samples,
    }
}

fn completed(outcome: Outcome) -> ats_daq::AcquisitionResult {
    match outcome {
        Outcome::Completed(result) => result,
        Outcome::Cancelled {
            buffers_completed, ..
        } => {
            panic!("cancelled after {} buffers", buffers_completed)
        }
    }
}

/// 12-bit code for averaged record `k` on channel `c`, garbage while the
/// ignored triggers go by.
fn slot_code(record: usize, channel: usize) -> u16 {
    if record < 2 {
        0xFFF0
    } else {
        ((1000 + 500 * channel + 100 * ((record - 2) % 3)) as u16) << 4
    }
}

#[test]
fn two_channel_acquisition_lands_each_record_in_its_slot() {
    let sim = SimulatedDigitizer::new(Arc::new(|record: usize, _: usize, channel: usize| {
        slot_code(record, channel)
    }));
    let mut dig = Digitizer::new(sim, setup(BoardModel::ATS9360, vec![0, 1]));

    let result = completed(
        dig.acquire(&request(3, 5, 2, 300), false, &CancelToken::new(), |_| {})
            .unwrap(),
    );
    assert_eq!(dig.state(), AcquisitionState::Completed);
    assert_eq!(result.plan.samples_per_record, 384);
    assert_eq!(result.traces.len(), 2);

    let scale = CodeScale::new(12);
    for channel in 0..2u32 {
        let trace = result.trace(channel).unwrap().trimmed(300);
        assert_eq!(trace.records.dim(), (3, 300));
        for k in 0..3 {
            let expected = scale.normalize(slot_code(k + 2, channel as usize) as f64);
            assert!(trace
                .record(k)
                .iter()
                .all(|&v| (v - expected).abs() < 1e-12));
        }
    }
    assert!(!dig.device().is_capturing());
}

#[test]
fn sine_waveform_survives_averaging() {
    let sim = SimulatedDigitizer::with_waveform(
        12,
        SimWaveform {
            offset: 0.0,
            amplitude: 0.5,
            period_samples: 64.0,
            noise: 0.0,
        },
    );
    let mut dig = Digitizer::new(sim, setup(BoardModel::ATS9360, vec![0]));
    let result = completed(
        dig.acquire(&request(1, 10, 0, 256), false, &CancelToken::new(), |_| {})
            .unwrap(),
    );
    let trace = result.trace(0).unwrap();
    assert!((trace.records[[0, 16]] - 0.5).abs() < 1e-3);
    assert!((trace.records[[0, 48]] + 0.5).abs() < 1e-3);
    assert!(trace.records.mean().unwrap().abs() < 1e-3);

    let volts = trace.to_volts(0.4);
    assert!((volts.records[[0, 16]] - 0.2).abs() < 1e-3);
}

#[test]
fn repeated_acquisitions_reuse_the_pool() {
    let sim = SimulatedDigitizer::new(Arc::new(|_: usize, _: usize, _: usize| 0x8000u16));
    let mut dig = Digitizer::new(sim, setup(BoardModel::ATS9360, vec![0, 1]));
    let cancel = CancelToken::new();

    for _ in 0..3 {
        completed(dig.acquire(&request(2, 8, 0, 256), false, &cancel, |_| {}).unwrap());
    }
    assert_eq!(dig.pool().allocations(), 1);
    for slot in 0..dig.pool().depth() {
        assert_eq!(dig.pool().state(slot), BufferState::Idle);
    }

    // a different capture size needs new buffers
    completed(dig.acquire(&request(2, 16, 0, 256), false, &cancel, |_| {}).unwrap());
    assert_eq!(dig.pool().allocations(), 2);
}

#[test]
fn slow_processing_overflows_the_ring() {
    let sim = SimulatedDigitizer::new(Arc::new(|_: usize, _: usize, _: usize| 128u16))
        .overflow_slack(Duration::from_millis(5));
    let mut setup = setup(BoardModel::ATS9870, vec![0]);
    setup.pool_depth = 1;
    let mut dig = Digitizer::new(sim, setup);

    // just over 16 MiB, so there is more than one buffer to wait for
    let err = dig
        .acquire(&request(1, 70_000, 0, 256), false, &CancelToken::new(), |_| {
            thread::sleep(Duration::from_millis(300))
        })
        .unwrap_err();
    assert!(matches!(
        err,
        AcqError::Hardware(DeviceError::BufferOverflow { .. })
    ));
    assert_eq!(dig.state(), AcquisitionState::Aborted);
    assert_eq!(dig.pool().state(0), BufferState::Idle);
}

#[test]
fn silent_external_trigger_times_out_on_the_first_buffer() {
    let sim = SimulatedDigitizer::new(Arc::new(|_: usize, _: usize, _: usize| 128u16)).max_triggers(0);
    let mut setup = setup(BoardModel::ATS9870, vec![0, 1]);
    setup.timeouts.first_buffer = Duration::from_millis(50);
    let mut dig = Digitizer::new(sim, setup);

    let err = dig
        .acquire(&request(1, 1, 0, 256), true, &CancelToken::new(), |_| {})
        .unwrap_err();
    assert!(matches!(
        err,
        AcqError::HardwareTimeout { buffer_index: 0, timeout } if timeout == Duration::from_millis(50)
    ));
    assert_eq!(dig.state(), AcquisitionState::Aborted);
    assert!(!dig.device().is_capturing());
    for slot in 0..dig.pool().depth() {
        assert_eq!(dig.pool().state(slot), BufferState::Idle);
    }
}

#[test]
fn cancelled_before_start_completes_no_buffer() {
    let sim = SimulatedDigitizer::new(Arc::new(|_: usize, _: usize, _: usize| 128u16));
    let mut dig = Digitizer::new(sim, setup(BoardModel::ATS9870, vec![0]));
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = dig
        .acquire(&request(1, 4, 0, 256), false, &cancel, |_| {})
        .unwrap();
    let Outcome::Cancelled {
        buffers_completed,
        records_averaged,
        partial,
    } = outcome
    else {
        panic!("acquisition was not cancelled");
    };
    assert_eq!(buffers_completed, 0);
    assert_eq!(records_averaged, 0);
    // nothing was folded in, so every sample sits at the bottom of the range
    assert!(partial.trace(0).unwrap().records.iter().all(|&v| v == -1.0));
    assert_eq!(dig.state(), AcquisitionState::Aborted);

    // the next run starts over once the token is cleared
    cancel.reset();
    completed(dig.acquire(&request(1, 4, 0, 256), false, &cancel, |_| {}).unwrap());
    assert_eq!(dig.pool().allocations(), 1);
}
