use crate::command::CommandId;

/// Failures decoding frames and payloads produced by the other side of the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown command id: {0}")]
    UnknownCommand(u32),

    #[error("truncated payload: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("{command:?} payload is {actual} words, expected {expected}")]
    PayloadLength {
        command: CommandId,
        expected: usize,
        actual: usize,
    },

    #[error("command stream of {0} bytes is not word aligned")]
    UnalignedCommandStream(usize),

    #[error("batch {index} points outside the submission payload")]
    BadOffset { index: usize },

    #[error("renderer name is not nul-terminated")]
    UnterminatedName,

    #[error("unknown blob type: {0}")]
    UnknownBlobType(u32),

    #[error("frame of {0} bytes does not fit the length field")]
    FrameTooLarge(usize),
}
