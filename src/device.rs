use crate::{AcquisitionPlan, DeviceError};
use std::time::Duration;

/// Raw sample storage of one DMA buffer, sized for the board's sample width.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

/// Borrowed view of a buffer's sample codes.
#[derive(Debug, Clone, Copy)]
pub enum Samples<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
}

impl Samples<'_> {
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(s) => s.len(),
            Samples::U16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A DMA-capable memory region. Exactly one side owns it at a time: it is
/// moved into the device when posted and moved back out when the device
/// reports it filled.
#[derive(Debug)]
pub struct DmaBuffer {
    id: usize,
    data: SampleData,
}

impl DmaBuffer {
    /// Allocate a zeroed buffer of `size_bytes`.
    ///
    /// # Panics
    ///
    /// If `bytes_per_sample` is not 1 or 2.
    pub fn new(id: usize, bytes_per_sample: usize, size_bytes: usize) -> Self {
        let data = match bytes_per_sample {
            1 => SampleData::U8(vec![0u8; size_bytes]),
            2 => SampleData::U16(vec![0u16; size_bytes / 2]),
            n => panic!("unsupported sample width: {n} bytes"),
        };
        Self { id, data }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self.data {
            SampleData::U8(_) => 1,
            SampleData::U16(_) => 2,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.samples().len() * self.bytes_per_sample()
    }

    pub fn samples(&self) -> Samples<'_> {
        match &self.data {
            SampleData::U8(v) => Samples::U8(v),
            SampleData::U16(v) => Samples::U16(v),
        }
    }

    /// Mutable access for whoever currently owns the buffer. In practice
    /// that is the DMA engine.
    pub fn data_mut(&mut self) -> &mut SampleData {
        &mut self.data
    }
}

/// Operations the acquisition loop needs from a digitizer.
///
/// Buffers travel by value: `post_buffer` gives one to hardware,
/// `wait_buffer_complete` hands it back once filled. Buffers are completed in
/// the order they were posted.
pub trait DmaDevice {
    /// Program record size and record counts for the upcoming capture.
    fn configure_capture(&mut self, plan: &AcquisitionPlan) -> Result<(), DeviceError>;

    fn post_buffer(&mut self, buffer: DmaBuffer) -> Result<(), DeviceError>;

    /// Block until buffer `id` is filled. `Ok(None)` means the timeout
    /// elapsed with the buffer still owned by hardware.
    fn wait_buffer_complete(
        &mut self,
        id: usize,
        timeout: Duration,
    ) -> Result<Option<DmaBuffer>, DeviceError>;

    fn start_capture(&mut self) -> Result<(), DeviceError>;

    /// Stop the transfer and return every buffer hardware still holds.
    /// Safe to call when no capture is running.
    fn abort_capture(&mut self) -> Result<Vec<DmaBuffer>, DeviceError>;
}
