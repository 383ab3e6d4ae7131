pub mod capset;
pub mod command;
pub mod error;
pub mod submit;
pub mod wire;

pub use capset::{Capset, CapsetId, VenusCapset};
pub use command::{BlobFlags, BlobType, CommandId, Param, Request, SyncPoint, SyncWaitFlags};
pub use error::ProtocolError;
pub use submit::{BatchTarget, SubmitBatch, WireBatch};
pub use wire::FrameHeader;
