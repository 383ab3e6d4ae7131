//! `SubmitCmd2` payload layout.
//!
//! ```text
//! u32 batch_count
//! batch_count x BatchHeader
//! cs data of every batch, in order
//! (u32 sync_id, u64 value) triples of every batch, in order
//! ```
//!
//! All offsets are in words from the start of the payload.

use bytemuck::{Pod, Zeroable};

use crate::command::{CommandId, SyncPoint, SYNC_POINT_WORDS};
use crate::error::ProtocolError;
use crate::wire::{FrameWriter, PayloadReader, WORD_SIZE};

/// Size of one batch header in words.
pub const BATCH_HEADER_WORDS: usize = std::mem::size_of::<BatchHeader>() / WORD_SIZE;

const SYNC_POINT_SIZE: usize = SYNC_POINT_WORDS * WORD_SIZE;

bitflags::bitflags! {
    /// Flags of a single batch header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BatchFlags: u32 {
        /// `sync_queue_index` / `sync_queue_id` name the queue that signals.
        const SYNC_QUEUE = 1 << 0;
    }
}

/// Which host timeline a batch's signals are ordered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTarget {
    /// Signals are not tied to a device queue.
    Cpu,
    Queue { index: u32, queue_id: u64 },
}

/// One batch of a submission, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct SubmitBatch<'a> {
    /// Encoded command stream, a whole number of words.
    pub cs_data: &'a [u8],
    /// Counters to update once the batch has executed.
    pub signals: &'a [SyncPoint],
    pub target: BatchTarget,
}

/// Owned form of a batch, as decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBatch {
    pub cs_data: Vec<u8>,
    pub signals: Vec<SyncPoint>,
    pub target: BatchTarget,
}

impl WireBatch {
    pub fn as_batch(&self) -> SubmitBatch<'_> {
        SubmitBatch {
            cs_data: &self.cs_data,
            signals: &self.signals,
            target: self.target,
        }
    }
}

/// Per-batch header exactly as laid out on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BatchHeader {
    pub cmd_offset: u32,
    pub cmd_size: u32,
    pub sync_offset: u32,
    pub sync_count: u32,
    pub flags: u32,
    pub sync_queue_index: u32,
    pub sync_queue_id: u64,
}

impl BatchHeader {
    fn to_le(self) -> Self {
        Self {
            cmd_offset: self.cmd_offset.to_le(),
            cmd_size: self.cmd_size.to_le(),
            sync_offset: self.sync_offset.to_le(),
            sync_count: self.sync_count.to_le(),
            flags: self.flags.to_le(),
            sync_queue_index: self.sync_queue_index.to_le(),
            sync_queue_id: self.sync_queue_id.to_le(),
        }
    }

    fn from_le(self) -> Self {
        Self {
            cmd_offset: u32::from_le(self.cmd_offset),
            cmd_size: u32::from_le(self.cmd_size),
            sync_offset: u32::from_le(self.sync_offset),
            sync_count: u32::from_le(self.sync_count),
            flags: u32::from_le(self.flags),
            sync_queue_index: u32::from_le(self.sync_queue_index),
            sync_queue_id: u64::from_le(self.sync_queue_id),
        }
    }

    pub fn target(&self) -> BatchTarget {
        if BatchFlags::from_bits_retain(self.flags).contains(BatchFlags::SYNC_QUEUE) {
            BatchTarget::Queue {
                index: self.sync_queue_index,
                queue_id: self.sync_queue_id,
            }
        } else {
            BatchTarget::Cpu
        }
    }
}

/// Byte sizes of the three sections of a submission payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitLayout {
    pub header_size: usize,
    pub cs_size: usize,
    pub sync_size: usize,
}

impl SubmitLayout {
    pub fn compute(batches: &[SubmitBatch<'_>]) -> Result<Self, ProtocolError> {
        if batches.is_empty() {
            return Ok(Self::default());
        }

        let header_size = WORD_SIZE + std::mem::size_of::<BatchHeader>() * batches.len();
        let mut cs_size = 0;
        let mut sync_size = 0;
        for batch in batches {
            if batch.cs_data.len() % WORD_SIZE != 0 {
                return Err(ProtocolError::UnalignedCommandStream(batch.cs_data.len()));
            }
            cs_size += batch.cs_data.len();
            sync_size += SYNC_POINT_SIZE * batch.signals.len();
        }

        Ok(Self {
            header_size,
            cs_size,
            sync_size,
        })
    }

    pub fn total_size(&self) -> usize {
        self.header_size + self.cs_size + self.sync_size
    }
}

/// Encode a complete `SubmitCmd2` frame. Returns `None` when there is nothing
/// to submit.
pub fn encode_submit_cmd2(
    batches: &[SubmitBatch<'_>],
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let layout = SubmitLayout::compute(batches)?;
    let total_size = layout.total_size();
    if total_size == 0 {
        return Ok(None);
    }

    let mut w = FrameWriter::new(CommandId::SubmitCmd2, total_size / WORD_SIZE)?;

    w.put_u32(batches.len() as u32);
    let mut cs_offset = layout.header_size;
    let mut sync_offset = cs_offset + layout.cs_size;
    for batch in batches {
        let mut header = BatchHeader {
            cmd_offset: (cs_offset / WORD_SIZE) as u32,
            cmd_size: (batch.cs_data.len() / WORD_SIZE) as u32,
            sync_offset: (sync_offset / WORD_SIZE) as u32,
            sync_count: batch.signals.len() as u32,
            ..Default::default()
        };
        if let BatchTarget::Queue { index, queue_id } = batch.target {
            header.flags = BatchFlags::SYNC_QUEUE.bits();
            header.sync_queue_index = index;
            header.sync_queue_id = queue_id;
        }
        w.put_bytes(bytemuck::bytes_of(&header.to_le()));

        cs_offset += batch.cs_data.len();
        sync_offset += SYNC_POINT_SIZE * batch.signals.len();
    }

    for batch in batches {
        w.put_bytes(batch.cs_data);
    }

    for batch in batches {
        for point in batch.signals {
            point.put(&mut w);
        }
    }

    Ok(Some(w.finish()))
}

/// A decoded submission: the raw headers plus the batches they describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSubmit {
    pub headers: Vec<BatchHeader>,
    pub batches: Vec<WireBatch>,
}

/// Decode a `SubmitCmd2` payload (without the frame header).
pub fn decode_submit_cmd2(payload: &[u8]) -> Result<DecodedSubmit, ProtocolError> {
    let mut r = PayloadReader::new(payload);
    let batch_count = r.get_u32()? as usize;

    let mut headers = Vec::new();
    for _ in 0..batch_count {
        let bytes = r.get_bytes(std::mem::size_of::<BatchHeader>())?;
        headers.push(bytemuck::pod_read_unaligned::<BatchHeader>(bytes).from_le());
    }

    let mut batches = Vec::with_capacity(headers.len());
    for (index, header) in headers.iter().enumerate() {
        let cs_start = header.cmd_offset as usize * WORD_SIZE;
        let cs_end = cs_start + header.cmd_size as usize * WORD_SIZE;
        let sync_start = header.sync_offset as usize * WORD_SIZE;
        let sync_end = sync_start + header.sync_count as usize * SYNC_POINT_SIZE;
        if cs_end > payload.len() || sync_end > payload.len() {
            return Err(ProtocolError::BadOffset { index });
        }

        let mut sr = PayloadReader::new(&payload[sync_start..sync_end]);
        let signals = (0..header.sync_count)
            .map(|_| SyncPoint::read(&mut sr))
            .collect::<Result<Vec<_>, _>>()?;

        batches.push(WireBatch {
            cs_data: payload[cs_start..cs_end].to_vec(),
            signals,
            target: header.target(),
        });
    }

    Ok(DecodedSubmit { headers, batches })
}
