//! Command vocabulary of the vtest protocol and the requests a client sends.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::submit::{self, WireBatch};
use crate::wire::{FrameHeader, FrameWriter, PayloadReader, WORD_SIZE};

/// Protocol version this client asks the host for.
pub const PROTOCOL_VERSION: u32 = 3;

/// Oldest host protocol version the client can work with.
pub const MIN_PROTOCOL_VERSION: u32 = 3;

// ── Payload sizes, in words ─────────────────────────────────

pub const PING_PROTOCOL_VERSION_SIZE: usize = 0;
pub const BUSY_WAIT_SIZE: usize = 2;
pub const BUSY_WAIT_RESPONSE_SIZE: usize = 1;
pub const PROTOCOL_VERSION_SIZE: usize = 1;
pub const GET_PARAM_SIZE: usize = 1;
pub const GET_PARAM_RESPONSE_SIZE: usize = 2;
pub const GET_CAPSET_SIZE: usize = 2;
pub const CONTEXT_INIT_SIZE: usize = 1;
pub const RES_CREATE_BLOB_SIZE: usize = 6;
pub const RES_CREATE_BLOB_RESPONSE_SIZE: usize = 1;
pub const RES_UNREF_SIZE: usize = 1;
pub const SYNC_CREATE_SIZE: usize = 2;
pub const SYNC_CREATE_RESPONSE_SIZE: usize = 1;
pub const SYNC_UNREF_SIZE: usize = 1;
pub const SYNC_READ_SIZE: usize = 1;
pub const SYNC_READ_RESPONSE_SIZE: usize = 2;
pub const SYNC_WRITE_SIZE: usize = 3;
pub const SYNC_WAIT_RESPONSE_SIZE: usize = 0;

/// Words taken by one `(sync_id, value_lo, value_hi)` triple.
pub const SYNC_POINT_WORDS: usize = 3;

/// Payload size of a sync-wait request over `count` syncs.
pub const fn sync_wait_size(count: usize) -> usize {
    2 + SYNC_POINT_WORDS * count
}

/// Command ids understood by the host. Values follow the vtest numbering.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandId {
    ResourceUnref = 3,
    ResourceBusyWait = 7,
    CreateRenderer = 8,
    PingProtocolVersion = 10,
    ProtocolVersion = 11,
    GetParam = 15,
    GetCapset = 16,
    ContextInit = 17,
    ResourceCreateBlob = 18,
    SyncCreate = 19,
    SyncUnref = 20,
    SyncRead = 21,
    SyncWrite = 22,
    SyncWait = 23,
    SubmitCmd2 = 24,
}

impl TryFrom<u32> for CommandId {
    type Error = ProtocolError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(match raw {
            3 => Self::ResourceUnref,
            7 => Self::ResourceBusyWait,
            8 => Self::CreateRenderer,
            10 => Self::PingProtocolVersion,
            11 => Self::ProtocolVersion,
            15 => Self::GetParam,
            16 => Self::GetCapset,
            17 => Self::ContextInit,
            18 => Self::ResourceCreateBlob,
            19 => Self::SyncCreate,
            20 => Self::SyncUnref,
            21 => Self::SyncRead,
            22 => Self::SyncWrite,
            23 => Self::SyncWait,
            24 => Self::SubmitCmd2,
            other => return Err(ProtocolError::UnknownCommand(other)),
        })
    }
}

/// Scalar parameters that can be queried with `GetParam`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    MaxSyncQueueCount = 1,
}

/// Where a blob's storage lives.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobType {
    /// Guest memory made visible to the host.
    Guest = 1,
    /// Host-side allocation named by an upper-layer memory id.
    Host3d = 2,
}

impl TryFrom<u32> for BlobType {
    type Error = ProtocolError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Self::Guest),
            2 => Ok(Self::Host3d),
            other => Err(ProtocolError::UnknownBlobType(other)),
        }
    }
}

bitflags::bitflags! {
    /// Flags carried by `ResourceCreateBlob`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlobFlags: u32 {
        const MAPPABLE     = 1 << 0;
        const SHAREABLE    = 1 << 1;
        const CROSS_DEVICE = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Flags carried by `SyncWait`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncWaitFlags: u32 {
        /// Satisfied by any one sync instead of all of them.
        const ANY = 1 << 0;
    }
}

/// A `(sync_id, value)` pair: "counter `sync_id` reaches `value`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncPoint {
    pub sync_id: u32,
    pub value: u64,
}

impl SyncPoint {
    pub fn new(sync_id: u32, value: u64) -> Self {
        Self { sync_id, value }
    }

    pub(crate) fn put(&self, writer: &mut FrameWriter) {
        writer.put_u32(self.sync_id).put_u64(self.value);
    }

    pub(crate) fn read(reader: &mut PayloadReader<'_>) -> Result<Self, ProtocolError> {
        let sync_id = reader.get_u32()?;
        let value = reader.get_u64()?;
        Ok(Self { sync_id, value })
    }
}

/// A request frame as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateRenderer {
        name: String,
    },
    PingProtocolVersion,
    ResourceBusyWait {
        handle: u32,
        flags: u32,
    },
    ProtocolVersion {
        version: u32,
    },
    GetParam {
        param: u32,
    },
    GetCapset {
        id: u32,
        version: u32,
    },
    ContextInit {
        capset_id: u32,
    },
    ResourceCreateBlob {
        blob_type: BlobType,
        flags: BlobFlags,
        size: u64,
        blob_id: u64,
    },
    ResourceUnref {
        res_id: u32,
    },
    SyncCreate {
        initial_value: u64,
    },
    SyncUnref {
        sync_id: u32,
    },
    SyncRead {
        sync_id: u32,
    },
    SyncWrite {
        sync_id: u32,
        value: u64,
    },
    SyncWait {
        flags: SyncWaitFlags,
        timeout_ms: u32,
        points: Vec<SyncPoint>,
    },
    SubmitCmd2 {
        batches: Vec<WireBatch>,
    },
}

impl Request {
    pub fn command_id(&self) -> CommandId {
        match self {
            Request::CreateRenderer { .. } => CommandId::CreateRenderer,
            Request::PingProtocolVersion => CommandId::PingProtocolVersion,
            Request::ResourceBusyWait { .. } => CommandId::ResourceBusyWait,
            Request::ProtocolVersion { .. } => CommandId::ProtocolVersion,
            Request::GetParam { .. } => CommandId::GetParam,
            Request::GetCapset { .. } => CommandId::GetCapset,
            Request::ContextInit { .. } => CommandId::ContextInit,
            Request::ResourceCreateBlob { .. } => CommandId::ResourceCreateBlob,
            Request::ResourceUnref { .. } => CommandId::ResourceUnref,
            Request::SyncCreate { .. } => CommandId::SyncCreate,
            Request::SyncUnref { .. } => CommandId::SyncUnref,
            Request::SyncRead { .. } => CommandId::SyncRead,
            Request::SyncWrite { .. } => CommandId::SyncWrite,
            Request::SyncWait { .. } => CommandId::SyncWait,
            Request::SubmitCmd2 { .. } => CommandId::SubmitCmd2,
        }
    }

    /// Encode the request into a complete frame (header + payload).
    ///
    /// A submission without batches encodes to no bytes at all: nothing is
    /// sent for it.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let id = self.command_id();
        let frame = match self {
            Request::CreateRenderer { name } => {
                // The only frame whose length field counts bytes.
                let size = name.len() + 1;
                let mut w = FrameWriter::with_length(id, size, size)?;
                w.put_bytes(name.as_bytes()).put_bytes(&[0]);
                w.finish()
            }
            Request::PingProtocolVersion => {
                FrameWriter::new(id, PING_PROTOCOL_VERSION_SIZE)?.finish()
            }
            Request::ResourceBusyWait { handle, flags } => {
                let mut w = FrameWriter::new(id, BUSY_WAIT_SIZE)?;
                w.put_u32(*handle).put_u32(*flags);
                w.finish()
            }
            Request::ProtocolVersion { version } => {
                let mut w = FrameWriter::new(id, PROTOCOL_VERSION_SIZE)?;
                w.put_u32(*version);
                w.finish()
            }
            Request::GetParam { param } => {
                let mut w = FrameWriter::new(id, GET_PARAM_SIZE)?;
                w.put_u32(*param);
                w.finish()
            }
            Request::GetCapset { id: capset, version } => {
                let mut w = FrameWriter::new(id, GET_CAPSET_SIZE)?;
                w.put_u32(*capset).put_u32(*version);
                w.finish()
            }
            Request::ContextInit { capset_id } => {
                let mut w = FrameWriter::new(id, CONTEXT_INIT_SIZE)?;
                w.put_u32(*capset_id);
                w.finish()
            }
            Request::ResourceCreateBlob {
                blob_type,
                flags,
                size,
                blob_id,
            } => {
                let mut w = FrameWriter::new(id, RES_CREATE_BLOB_SIZE)?;
                w.put_u32(*blob_type as u32)
                    .put_u32(flags.bits())
                    .put_u64(*size)
                    .put_u64(*blob_id);
                w.finish()
            }
            Request::ResourceUnref { res_id } => {
                let mut w = FrameWriter::new(id, RES_UNREF_SIZE)?;
                w.put_u32(*res_id);
                w.finish()
            }
            Request::SyncCreate { initial_value } => {
                let mut w = FrameWriter::new(id, SYNC_CREATE_SIZE)?;
                w.put_u64(*initial_value);
                w.finish()
            }
            Request::SyncUnref { sync_id } => {
                let mut w = FrameWriter::new(id, SYNC_UNREF_SIZE)?;
                w.put_u32(*sync_id);
                w.finish()
            }
            Request::SyncRead { sync_id } => {
                let mut w = FrameWriter::new(id, SYNC_READ_SIZE)?;
                w.put_u32(*sync_id);
                w.finish()
            }
            Request::SyncWrite { sync_id, value } => {
                let mut w = FrameWriter::new(id, SYNC_WRITE_SIZE)?;
                w.put_u32(*sync_id).put_u64(*value);
                w.finish()
            }
            Request::SyncWait {
                flags,
                timeout_ms,
                points,
            } => {
                let mut w = FrameWriter::new(id, sync_wait_size(points.len()))?;
                w.put_u32(flags.bits()).put_u32(*timeout_ms);
                for point in points {
                    point.put(&mut w);
                }
                w.finish()
            }
            Request::SubmitCmd2 { batches } => {
                let borrowed: Vec<_> = batches.iter().map(WireBatch::as_batch).collect();
                submit::encode_submit_cmd2(&borrowed)?.unwrap_or_default()
            }
        };
        Ok(frame)
    }

    /// Decode a request from its header and the payload bytes that followed it.
    pub fn decode(header: FrameHeader, payload: &[u8]) -> Result<Request, ProtocolError> {
        let id = header.command_id()?;
        if payload.len() != header.payload_len() {
            return Err(ProtocolError::Truncated {
                needed: header.payload_len(),
                available: payload.len(),
            });
        }

        let words = header.length as usize;
        let expect = |expected: usize| {
            if words == expected {
                Ok(())
            } else {
                Err(ProtocolError::PayloadLength {
                    command: id,
                    expected,
                    actual: words,
                })
            }
        };

        let mut r = PayloadReader::new(payload);
        let request = match id {
            // The only frame whose length counts bytes; no word check.
            CommandId::CreateRenderer => match payload.split_last() {
                Some((&0, name)) => Request::CreateRenderer {
                    name: String::from_utf8_lossy(name).into_owned(),
                },
                _ => return Err(ProtocolError::UnterminatedName),
            },
            CommandId::PingProtocolVersion => {
                expect(PING_PROTOCOL_VERSION_SIZE)?;
                Request::PingProtocolVersion
            }
            CommandId::ResourceBusyWait => {
                expect(BUSY_WAIT_SIZE)?;
                Request::ResourceBusyWait {
                    handle: r.get_u32()?,
                    flags: r.get_u32()?,
                }
            }
            CommandId::ProtocolVersion => {
                expect(PROTOCOL_VERSION_SIZE)?;
                Request::ProtocolVersion {
                    version: r.get_u32()?,
                }
            }
            CommandId::GetParam => {
                expect(GET_PARAM_SIZE)?;
                Request::GetParam {
                    param: r.get_u32()?,
                }
            }
            CommandId::GetCapset => {
                expect(GET_CAPSET_SIZE)?;
                Request::GetCapset {
                    id: r.get_u32()?,
                    version: r.get_u32()?,
                }
            }
            CommandId::ContextInit => {
                expect(CONTEXT_INIT_SIZE)?;
                Request::ContextInit {
                    capset_id: r.get_u32()?,
                }
            }
            CommandId::ResourceCreateBlob => {
                expect(RES_CREATE_BLOB_SIZE)?;
                Request::ResourceCreateBlob {
                    blob_type: BlobType::try_from(r.get_u32()?)?,
                    flags: BlobFlags::from_bits_retain(r.get_u32()?),
                    size: r.get_u64()?,
                    blob_id: r.get_u64()?,
                }
            }
            CommandId::ResourceUnref => {
                expect(RES_UNREF_SIZE)?;
                Request::ResourceUnref {
                    res_id: r.get_u32()?,
                }
            }
            CommandId::SyncCreate => {
                expect(SYNC_CREATE_SIZE)?;
                Request::SyncCreate {
                    initial_value: r.get_u64()?,
                }
            }
            CommandId::SyncUnref => {
                expect(SYNC_UNREF_SIZE)?;
                Request::SyncUnref {
                    sync_id: r.get_u32()?,
                }
            }
            CommandId::SyncRead => {
                expect(SYNC_READ_SIZE)?;
                Request::SyncRead {
                    sync_id: r.get_u32()?,
                }
            }
            CommandId::SyncWrite => {
                expect(SYNC_WRITE_SIZE)?;
                Request::SyncWrite {
                    sync_id: r.get_u32()?,
                    value: r.get_u64()?,
                }
            }
            CommandId::SyncWait => {
                if words < sync_wait_size(0) || (words - 2) % SYNC_POINT_WORDS != 0 {
                    return Err(ProtocolError::PayloadLength {
                        command: id,
                        expected: sync_wait_size((words.saturating_sub(2)) / SYNC_POINT_WORDS),
                        actual: words,
                    });
                }
                let flags = SyncWaitFlags::from_bits_retain(r.get_u32()?);
                let timeout_ms = r.get_u32()?;
                let count = r.remaining() / (SYNC_POINT_WORDS * WORD_SIZE);
                let points = (0..count)
                    .map(|_| SyncPoint::read(&mut r))
                    .collect::<Result<Vec<_>, _>>()?;
                Request::SyncWait {
                    flags,
                    timeout_ms,
                    points,
                }
            }
            CommandId::SubmitCmd2 => Request::SubmitCmd2 {
                batches: submit::decode_submit_cmd2(payload)?.batches,
            },
        };
        Ok(request)
    }
}
