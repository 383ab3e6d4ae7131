//! The driver-facing renderer contract and its vtest implementation.

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use ash::vk;
use serde::Serialize;
use tracing::{info, warn};

use vtest_core::VtestConfig;
use vtest_protocol::capset::Capset;
use vtest_protocol::command::SyncPoint;
use vtest_protocol::submit::{BatchTarget, SubmitBatch};

use crate::connection::Connection;
use crate::control::{self, Negotiated};
use crate::error::RendererError;
use crate::resource::Resource;
use crate::submit;
use crate::sync::TimelineSync;
use crate::wait;

/// PCI ids reported for the virtual device.
pub const PCI_VENDOR_ID: u32 = 0x1af4;
pub const PCI_DEVICE_ID: u32 = 0x1050;

/// What the renderer reports to the driver at device enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RendererInfo {
    pub pci_vendor_id: u32,
    pub pci_device_id: u32,
    pub has_dmabuf_import: bool,
    pub has_cache_management: bool,
    pub has_timeline_sync: bool,
    pub has_external_sync: bool,
    pub max_sync_queue_count: u32,
    pub wire_format_version: u32,
    pub vk_xml_version: u32,
    pub vk_ext_command_serialization_spec_version: u32,
    pub vk_mesa_venus_protocol_spec_version: u32,
}

/// Anything that can name a point on its own timeline.
pub trait SyncHandle {
    fn point(&self, value: u64) -> SyncPoint;
}

impl SyncHandle for TimelineSync {
    fn point(&self, value: u64) -> SyncPoint {
        TimelineSync::point(self, value)
    }
}

/// Operations a transport offers to the driver.
pub trait Renderer: Send + Sync {
    type Bo;
    type Sync: SyncHandle;

    fn info(&self) -> RendererInfo;

    fn submit(&self, batches: &[SubmitBatch<'_>]) -> Result<(), RendererError>;

    fn wait(&self, points: &[SyncPoint], any: bool, timeout_ns: u64)
        -> Result<(), RendererError>;

    fn bo_create_cpu(&self, size: u64) -> Result<Self::Bo, RendererError>;

    fn bo_create_gpu(
        &self,
        size: u64,
        mem_id: u64,
        properties: vk::MemoryPropertyFlags,
        external_handles: vk::ExternalMemoryHandleTypeFlags,
    ) -> Result<Self::Bo, RendererError>;

    fn sync_create(&self, initial_value: u64) -> Result<Self::Sync, RendererError>;

    /// Submit a single command stream with nothing to signal.
    fn submit_simple(&self, cs_data: &[u8]) -> Result<(), RendererError> {
        self.submit(&[SubmitBatch {
            cs_data,
            signals: &[],
            target: BatchTarget::Cpu,
        }])
    }

    /// A binary fence on top of a timeline: 1 is signaled, 0 is not.
    fn create_fence_sync(&self, signaled: bool) -> Result<Self::Sync, RendererError> {
        self.sync_create(u64::from(signaled))
    }

    fn wait_one(
        &self,
        sync: &Self::Sync,
        value: u64,
        timeout_ns: u64,
    ) -> Result<(), RendererError> {
        self.wait(&[sync.point(value)], false, timeout_ns)
    }
}

/// Renderer talking to a vtest server over its unix socket.
pub struct VtestRenderer {
    conn: Arc<Connection>,
    negotiated: Negotiated,
}

impl VtestRenderer {
    /// Connect to the configured socket and run the handshake.
    pub fn connect(config: &VtestConfig) -> Result<Self, RendererError> {
        let conn = Connection::connect(&config.socket_path).map_err(|e| {
            warn!("failed to connect to {}: {}", config.socket_path, e);
            RendererError::InitializationFailed(format!(
                "connect to {}: {}",
                config.socket_path, e
            ))
        })?;
        let renderer = Self::with_connection(
            conn,
            &config.resolved_renderer_name(),
            config.requested_protocol_version(),
        )?;
        info!("vtest renderer connected to {}", config.socket_path);
        Ok(renderer)
    }

    /// Run the handshake over an already connected stream.
    pub fn from_stream(
        stream: UnixStream,
        name: &str,
        protocol_version: u32,
    ) -> Result<Self, RendererError> {
        Self::with_connection(Connection::from_stream(stream), name, protocol_version)
    }

    fn with_connection(
        conn: Connection,
        name: &str,
        protocol_version: u32,
    ) -> Result<Self, RendererError> {
        // On failure `conn` is dropped here, which shuts the socket down.
        let negotiated = control::handshake(&conn, name, protocol_version)?;
        Ok(Self {
            conn: Arc::new(conn),
            negotiated,
        })
    }

    pub fn protocol_version(&self) -> u32 {
        self.negotiated.protocol_version
    }

    pub fn max_sync_queue_count(&self) -> u32 {
        self.negotiated.max_sync_queue_count
    }

    pub fn capset(&self) -> &Capset {
        &self.negotiated.capset
    }
}

impl Renderer for VtestRenderer {
    type Bo = Resource;
    type Sync = TimelineSync;

    fn info(&self) -> RendererInfo {
        let capset = &self.negotiated.capset.data;
        RendererInfo {
            pci_vendor_id: PCI_VENDOR_ID,
            pci_device_id: PCI_DEVICE_ID,
            has_dmabuf_import: false,
            has_cache_management: false,
            has_timeline_sync: true,
            has_external_sync: false,
            max_sync_queue_count: self.negotiated.max_sync_queue_count,
            wire_format_version: capset.wire_format_version,
            vk_xml_version: capset.vk_xml_version,
            vk_ext_command_serialization_spec_version: capset
                .vk_ext_command_serialization_spec_version,
            vk_mesa_venus_protocol_spec_version: capset.vk_mesa_venus_protocol_spec_version,
        }
    }

    fn submit(&self, batches: &[SubmitBatch<'_>]) -> Result<(), RendererError> {
        submit::submit(&self.conn, batches)
    }

    fn wait(
        &self,
        points: &[SyncPoint],
        any: bool,
        timeout_ns: u64,
    ) -> Result<(), RendererError> {
        wait::wait(&self.conn, points, any, timeout_ns)
    }

    fn bo_create_cpu(&self, size: u64) -> Result<Resource, RendererError> {
        Resource::create_cpu(&self.conn, size)
    }

    fn bo_create_gpu(
        &self,
        size: u64,
        mem_id: u64,
        properties: vk::MemoryPropertyFlags,
        external_handles: vk::ExternalMemoryHandleTypeFlags,
    ) -> Result<Resource, RendererError> {
        Resource::create_gpu(&self.conn, size, mem_id, properties, external_handles)
    }

    fn sync_create(&self, initial_value: u64) -> Result<TimelineSync, RendererError> {
        TimelineSync::create(&self.conn, initial_value)
    }
}
