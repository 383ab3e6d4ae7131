use ash::vk;

use vtest_protocol::ProtocolError;

/// Failures the transport reports to the driver.
///
/// Connection loss is not among them: it ends the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RendererError {
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("out of host memory")]
    OutOfHostMemory,

    #[error("device lost")]
    DeviceLost,

    #[error("timeout")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl From<RendererError> for vk::Result {
    fn from(err: RendererError) -> Self {
        match err {
            RendererError::InitializationFailed(_) => vk::Result::ERROR_INITIALIZATION_FAILED,
            RendererError::OutOfHostMemory => vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            RendererError::DeviceLost => vk::Result::ERROR_DEVICE_LOST,
            RendererError::Timeout => vk::Result::TIMEOUT,
            RendererError::Protocol(_) => vk::Result::ERROR_UNKNOWN,
        }
    }
}
