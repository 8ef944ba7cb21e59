use crate::{AcqError, AcquisitionPlan, DeviceError, DmaBuffer, DmaDevice, Result};
use log::{debug, info, warn};
use std::time::Duration;

pub const DEFAULT_POOL_DEPTH: usize = 10;

/// Who owns a ring slot right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// Held by software with nothing in it to process: freshly allocated or
    /// returned by an abort.
    Idle,
    PostedToHardware,
    FilledReadyForProcessing,
}

/// Ring of `depth` equally sized buffers. Slot `i` holds the buffer with id
/// `i`; `None` means hardware has it.
#[derive(Debug)]
pub struct BufferPool {
    depth: usize,
    bytes_per_buffer: usize,
    bytes_per_sample: usize,
    slots: Vec<Option<DmaBuffer>>,
    filled: Vec<bool>,
    allocations: usize,
}

impl BufferPool {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            bytes_per_buffer: 0,
            bytes_per_sample: 0,
            slots: Vec::new(),
            filled: Vec::new(),
            allocations: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn bytes_per_buffer(&self) -> usize {
        self.bytes_per_buffer
    }

    /// How many times the ring has been (re)allocated.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Make sure the ring matches `plan`. Allocation is skipped when the
    /// previous acquisition used the same buffer size and every buffer came
    /// back. Returns `true` if buffers were allocated.
    pub fn ensure_allocated(&mut self, plan: &AcquisitionPlan) -> bool {
        let bytes_per_buffer = plan.bytes_per_buffer();
        let intact = self.slots.len() == self.depth && self.slots.iter().all(Option::is_some);
        if intact
            && self.bytes_per_buffer == bytes_per_buffer
            && self.bytes_per_sample == plan.bytes_per_sample
        {
            debug!("Reusing {} buffers of {} bytes", self.depth, bytes_per_buffer);
            return false;
        }

        self.slots.clear();
        self.slots.extend(
            (0..self.depth).map(|id| Some(DmaBuffer::new(id, plan.bytes_per_sample, bytes_per_buffer))),
        );
        self.filled = vec![false; self.depth];
        self.bytes_per_buffer = bytes_per_buffer;
        self.bytes_per_sample = plan.bytes_per_sample;
        self.allocations += 1;
        info!("Allocate {} buffers, size: {} bytes", self.depth, bytes_per_buffer);
        true
    }

    pub fn state(&self, index: usize) -> BufferState {
        let slot = index % self.depth;
        match self.slots.get(slot) {
            Some(None) => BufferState::PostedToHardware,
            Some(Some(_)) if self.filled[slot] => BufferState::FilledReadyForProcessing,
            _ => BufferState::Idle,
        }
    }

    /// Hand every buffer to hardware. Must run before capture starts.
    pub fn post_all<D: DmaDevice + ?Sized>(
        &mut self,
        device: &mut D,
    ) -> std::result::Result<(), DeviceError> {
        for slot in 0..self.slots.len() {
            self.post_slot(device, slot)?;
        }
        Ok(())
    }

    /// Wait for ring position `index` to be filled and borrow its contents.
    ///
    /// # Panics
    ///
    /// If the slot was never reposted since it was last processed: the
    /// hardware would already be overwriting data software still owns.
    pub fn wait_next<D: DmaDevice + ?Sized>(
        &mut self,
        device: &mut D,
        index: usize,
        timeout: Duration,
    ) -> Result<&DmaBuffer> {
        let slot = index % self.depth;
        assert!(
            self.slots[slot].is_none(),
            "buffer {slot} was not reposted before the ring wrapped back to it"
        );

        let buffer = device
            .wait_buffer_complete(slot, timeout)?
            .ok_or(AcqError::HardwareTimeout {
                buffer_index: index,
                timeout,
            })?;
        assert_eq!(buffer.id(), slot, "hardware completed buffers out of order");

        self.filled[slot] = true;
        let buffer: &DmaBuffer = self.slots[slot].insert(buffer);
        Ok(buffer)
    }

    /// Give ring position `index` back to hardware. Must happen before the
    /// ring advances `depth` positions past `index`.
    pub fn repost<D: DmaDevice + ?Sized>(
        &mut self,
        device: &mut D,
        index: usize,
    ) -> std::result::Result<(), DeviceError> {
        self.post_slot(device, index % self.depth)
    }

    /// Take back buffers returned by an aborted capture. Slots that stay
    /// empty force a reallocation on the next arm.
    pub fn reclaim(&mut self, buffers: Vec<DmaBuffer>) {
        for buffer in buffers {
            let id = buffer.id();
            match self.slots.get_mut(id) {
                Some(slot @ None) => {
                    *slot = Some(buffer);
                    self.filled[id] = false;
                }
                _ => warn!("Dropping unexpected buffer {} returned by hardware", id),
            }
        }
        let lost = self.slots.iter().filter(|s| s.is_none()).count();
        if lost > 0 {
            warn!("{} buffers were not returned by hardware", lost);
        }
    }

    fn post_slot<D: DmaDevice + ?Sized>(
        &mut self,
        device: &mut D,
        slot: usize,
    ) -> std::result::Result<(), DeviceError> {
        let buffer = self.slots[slot]
            .take()
            .unwrap_or_else(|| panic!("buffer {slot} posted while hardware already owns it"));
        self.filled[slot] = false;
        device.post_buffer(buffer)
    }
}
