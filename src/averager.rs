use crate::{AcquisitionPlan, Samples};

/// Raw sample code as delivered by the DMA engine.
pub trait Sample: Copy + Into<f64> {}

impl Sample for u8 {}
impl Sample for u16 {}

/// Fixed for the lifetime of one acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AveragerParams {
    pub n_record: usize,
    pub n_average: usize,
    pub n_ignore_trig: usize,
    pub samples_per_record: usize,
    pub channel_count: usize,
}

impl AveragerParams {
    pub fn from_plan(plan: &AcquisitionPlan) -> Self {
        Self {
            n_record: plan.n_record,
            n_average: plan.n_average,
            n_ignore_trig: plan.n_ignore_trig,
            samples_per_record: plan.samples_per_record,
            channel_count: plan.channel_count,
        }
    }

    /// Samples in one record across all channels.
    pub fn record_len(&self) -> usize {
        self.samples_per_record * self.channel_count
    }

    pub fn accumulator_len(&self) -> usize {
        self.record_len() * self.n_record
    }

    /// Records that actually get averaged, ignored ones excluded.
    pub fn records_to_average(&self) -> usize {
        self.n_record * self.n_average
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AveragerState {
    pub records_completed: usize,
    pub records_ignored: usize,
}

impl AveragerState {
    pub fn is_complete(&self, params: &AveragerParams) -> bool {
        self.records_completed == params.records_to_average()
            && self.records_ignored == params.n_ignore_trig
    }
}

/// Fold one payload into `acc` and return how many records were averaged.
///
/// `payload` holds consecutive whole records; a trailing partial record is
/// not counted. Leading records are dropped until `n_ignore_trig` have been
/// seen, and anything past `n_record * n_average` averaged records is
/// dropped from the tail.
pub fn accumulate<S: Sample>(
    params: &AveragerParams,
    state: &mut AveragerState,
    acc: &mut [f64],
    payload: &[S],
) -> usize {
    let record_len = params.record_len();
    let len = acc.len();
    debug_assert_eq!(len, params.accumulator_len());
    if record_len == 0 || len == 0 {
        return 0;
    }

    let mut records = payload.len() / record_len;
    let mut payload = &payload[..records * record_len];

    let remaining_ignore = params.n_ignore_trig.saturating_sub(state.records_ignored);
    if remaining_ignore > 0 {
        if records <= remaining_ignore {
            state.records_ignored += records;
            return 0;
        }
        payload = &payload[remaining_ignore * record_len..];
        records -= remaining_ignore;
        state.records_ignored = params.n_ignore_trig;
    }

    let wanted = params
        .records_to_average()
        .saturating_sub(state.records_completed);
    if records > wanted {
        records = wanted;
        payload = &payload[..records * record_len];
    }
    if records == 0 {
        return 0;
    }

    let pos = (state.records_completed % params.n_record) * record_len;
    if pos + payload.len() <= len {
        add_into(&mut acc[pos..pos + payload.len()], payload);
    } else {
        let (head, rest) = payload.split_at(len - pos);
        add_into(&mut acc[pos..], head);
        let mut laps = rest.chunks_exact(len);
        for lap in &mut laps {
            add_into(acc, lap);
        }
        let tail = laps.remainder();
        add_into(&mut acc[..tail.len()], tail);
    }

    state.records_completed += records;
    records
}

fn add_into<S: Sample>(dst: &mut [f64], src: &[S]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d += s.into();
    }
}

/// Accumulator plus counters for one acquisition.
#[derive(Debug, Clone)]
pub struct Averager {
    params: AveragerParams,
    accumulator: Vec<f64>,
    state: AveragerState,
}

impl Averager {
    pub fn new(params: AveragerParams) -> Self {
        Self {
            params,
            accumulator: vec![0.0; params.accumulator_len()],
            state: AveragerState::default(),
        }
    }

    pub fn reset(&mut self) {
        self.accumulator.fill(0.0);
        self.state = AveragerState::default();
    }

    pub fn accumulate<S: Sample>(&mut self, payload: &[S]) -> usize {
        accumulate(&self.params, &mut self.state, &mut self.accumulator, payload)
    }

    pub fn accumulate_samples(&mut self, samples: Samples<'_>) -> usize {
        match samples {
            Samples::U8(s) => self.accumulate(s),
            Samples::U16(s) => self.accumulate(s),
        }
    }

    pub fn params(&self) -> &AveragerParams {
        &self.params
    }

    pub fn state(&self) -> AveragerState {
        self.state
    }

    pub fn accumulator(&self) -> &[f64] {
        &self.accumulator
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete(&self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params(
        n_record: usize,
        n_average: usize,
        n_ignore_trig: usize,
        samples_per_record: usize,
        channel_count: usize,
    ) -> AveragerParams {
        AveragerParams {
            n_record,
            n_average,
            n_ignore_trig,
            samples_per_record,
            channel_count,
        }
    }

    fn records_to_payload(records: &[[u8; 2]]) -> Vec<u8> {
        records.iter().flatten().copied().collect()
    }

    const EIGHT_RECORDS: [[u8; 2]; 8] = [
        [1, 1],
        [2, 2],
        [3, 3],
        [4, 4],
        [5, 5],
        [6, 6],
        [7, 7],
        [8, 8],
    ];

    #[test]
    fn single_buffer_wraps_around_accumulator_several_times() {
        let mut avg = Averager::new(params(2, 4, 0, 2, 1));
        let used = avg.accumulate(&records_to_payload(&EIGHT_RECORDS));
        assert_eq!(used, 8);
        assert_eq!(avg.accumulator(), &[16.0, 16.0, 20.0, 20.0]);
        let mean: Vec<f64> = avg.accumulator().iter().map(|v| v / 4.0).collect();
        assert_eq!(mean, vec![4.0, 4.0, 5.0, 5.0]);
        assert!(avg.is_complete());
    }

    #[test]
    fn surplus_records_are_truncated() {
        let mut avg = Averager::new(params(2, 2, 0, 2, 1));
        let used = avg.accumulate(&records_to_payload(&EIGHT_RECORDS));
        assert_eq!(used, 4);
        assert_eq!(avg.accumulator(), &[4.0, 4.0, 6.0, 6.0]);
        assert_eq!(avg.state().records_completed, 4);

        // nothing left to take
        assert_eq!(avg.accumulate(&[9u8, 9]), 0);
        assert_eq!(avg.accumulator(), &[4.0, 4.0, 6.0, 6.0]);
    }

    #[test]
    fn ignored_records_are_dropped_one_buffer_at_a_time() {
        let mut avg = Averager::new(params(1, 3, 1, 1, 1));
        for code in [10u8, 20, 30, 40] {
            avg.accumulate(&[code]);
        }
        assert_eq!(avg.state().records_ignored, 1);
        assert_eq!(avg.state().records_completed, 3);
        assert_eq!(avg.accumulator(), &[90.0]);
    }

    #[test]
    fn ignore_count_spanning_several_buffers() {
        let mut avg = Averager::new(params(1, 2, 5, 1, 1));
        assert_eq!(avg.accumulate(&[1u8, 1]), 0);
        assert_eq!(avg.accumulate(&[1u8, 1]), 0);
        assert_eq!(avg.state().records_ignored, 4);
        // one more ignored, then two averaged, then one surplus
        assert_eq!(avg.accumulate(&[1u8, 7, 9, 100]), 2);
        assert_eq!(avg.state().records_ignored, 5);
        assert_eq!(avg.accumulator(), &[16.0]);
    }

    #[test]
    fn interleaved_channels_stay_in_their_lanes() {
        // 2 samples x 2 channels per record, 2 slots
        let mut avg = Averager::new(params(2, 1, 0, 2, 2));
        avg.accumulate(&[1u16, 100, 2, 200, 3, 300, 4, 400]);
        assert_eq!(avg.accumulator(), &[1.0, 100.0, 2.0, 200.0, 3.0, 300.0, 4.0, 400.0]);
    }

    #[test]
    fn partial_trailing_record_is_not_counted() {
        let mut avg = Averager::new(params(1, 2, 0, 2, 1));
        assert_eq!(avg.accumulate(&[1u8, 2, 3]), 1);
        assert_eq!(avg.accumulator(), &[1.0, 2.0]);
    }

    #[test]
    fn reset_clears_accumulator_and_counters() {
        let mut avg = Averager::new(params(1, 2, 1, 1, 1));
        avg.accumulate(&[5u8, 6, 7]);
        avg.reset();
        assert_eq!(avg.state(), AveragerState::default());
        assert!(avg.accumulator().iter().all(|&v| v == 0.0));
    }

    /// Straight per-record fold used as the reference result.
    fn reference(p: &AveragerParams, stream: &[u8]) -> Vec<f64> {
        let record_len = p.record_len();
        let mut acc = vec![0.0; p.accumulator_len()];
        for (i, record) in stream
            .chunks_exact(record_len)
            .skip(p.n_ignore_trig)
            .take(p.records_to_average())
            .enumerate()
        {
            let slot = (i % p.n_record) * record_len;
            for (k, &v) in record.iter().enumerate() {
                acc[slot + k] += v as f64;
            }
        }
        acc
    }

    fn deliver(p: &AveragerParams, stream: &[u8], splits: &[usize]) -> (Vec<f64>, AveragerState) {
        let record_len = p.record_len();
        let mut avg = Averager::new(*p);
        let mut offset = 0;
        let mut k = 0;
        while offset < stream.len() {
            let records = splits[k % splits.len()];
            let end = (offset + records * record_len).min(stream.len());
            avg.accumulate(&stream[offset..end]);
            offset = end;
            k += 1;
        }
        (avg.accumulator().to_vec(), avg.state())
    }

    fn stream_strategy() -> impl Strategy<Value = (AveragerParams, Vec<u8>, Vec<usize>)> {
        (1usize..5, 1usize..6, 0usize..5, 1usize..4, 1usize..3, 0usize..6)
            .prop_flat_map(|(n_record, n_average, n_ignore, spr, cc, extra)| {
                let p = params(n_record, n_average, n_ignore, spr, cc);
                let total = (n_record * n_average + n_ignore + extra) * p.record_len();
                (
                    Just(p),
                    prop::collection::vec(any::<u8>(), total),
                    prop::collection::vec(1usize..12, 1..6),
                )
            })
    }

    proptest! {
        #[test]
        fn fold_is_independent_of_buffer_partition((p, stream, splits) in stream_strategy()) {
            let (acc, state) = deliver(&p, &stream, &splits);
            let (one_by_one, _) = deliver(&p, &stream, &[1]);
            prop_assert_eq!(&acc, &one_by_one);
            prop_assert_eq!(&acc, &reference(&p, &stream));
            prop_assert!(state.is_complete(&p));
        }

        #[test]
        fn ignoring_equals_deleting_leading_records((p, stream, splits) in stream_strategy()) {
            let (with_ignore, _) = deliver(&p, &stream, &splits);
            let trimmed = &stream[p.n_ignore_trig * p.record_len()..];
            let no_ignore = AveragerParams { n_ignore_trig: 0, ..p };
            let (without, _) = deliver(&no_ignore, trimmed, &splits);
            prop_assert_eq!(with_ignore, without);
        }

        #[test]
        fn every_slot_receives_n_average_contributions((p, _stream, splits) in stream_strategy()) {
            let total = p.records_to_average() + p.n_ignore_trig;
            let ones = vec![1u8; total * p.record_len()];
            let (acc, _) = deliver(&p, &ones, &splits);
            prop_assert!(acc.iter().all(|&v| v == p.n_average as f64));
        }
    }
}
