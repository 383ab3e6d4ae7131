//! Host blobs and their client-side mappings.

use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use vtest_protocol::command::{
    BlobFlags, BlobType, CommandId, Request, RES_CREATE_BLOB_RESPONSE_SIZE,
};

use crate::connection::Connection;
use crate::error::RendererError;

/// Translate the driver's view of a memory allocation into blob flags.
pub fn blob_flags_for(
    properties: vk::MemoryPropertyFlags,
    external_handles: vk::ExternalMemoryHandleTypeFlags,
) -> BlobFlags {
    let mut flags = BlobFlags::empty();
    if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        flags |= BlobFlags::MAPPABLE;
    }
    if !external_handles.is_empty() {
        flags |= BlobFlags::SHAREABLE;
    }
    if external_handles.contains(vk::ExternalMemoryHandleTypeFlags::DMA_BUF_EXT) {
        flags |= BlobFlags::CROSS_DEVICE;
    }
    flags
}

/// A shared, read/write mapping of a blob. Unmapped on drop.
struct MappedRegion {
    ptr: NonNull<u8>,
    len: NonZeroUsize,
}

// SAFETY: the region is process-wide shared memory owned by this value, not
// tied to the creating thread. Only the address is shared; callers
// synchronize their own accesses to the bytes.
unsafe impl Send for MappedRegion {}
// SAFETY: see above; `&MappedRegion` exposes nothing but the address.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    fn map(fd: &OwnedFd, len: NonZeroUsize) -> nix::Result<Self> {
        // SAFETY: a fresh mapping at a kernel-chosen address cannot alias
        // any existing Rust object; `fd` stays open for the call.
        let ptr = unsafe {
            mman::mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )?
        };
        Ok(Self {
            ptr: ptr.cast(),
            len,
        })
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` are exactly what mmap returned and the region
        // is unmapped only here, once.
        if let Err(e) = unsafe { mman::munmap(self.ptr.cast(), self.len.get()) } {
            warn!("munmap of {} bytes failed: {}", self.len, e);
        }
    }
}

#[derive(Default)]
struct ResourceState {
    res_id: u32,
    fd: Option<OwnedFd>,
    mapping: Option<MappedRegion>,
}

/// A live host blob.
///
/// Dropping the resource destroys it. The resource keeps the session alive.
pub struct Resource {
    conn: Arc<Connection>,
    blob_flags: BlobFlags,
    size: u64,
    state: Mutex<ResourceState>,
}

impl Resource {
    /// Ask the host for a blob and take ownership of the descriptor it grants.
    pub fn create_blob(
        conn: &Arc<Connection>,
        blob_type: BlobType,
        blob_flags: BlobFlags,
        size: u64,
        blob_id: u64,
    ) -> Result<Self, RendererError> {
        let frame = Request::ResourceCreateBlob {
            blob_type,
            flags: blob_flags,
            size,
            blob_id,
        }
        .encode()?;

        let (res_id, fd) = {
            let mut chan = conn.lock();
            chan.write_frame(&frame);
            chan.expect_header(
                CommandId::ResourceCreateBlob,
                Some(RES_CREATE_BLOB_RESPONSE_SIZE),
            );
            let res_id = chan.read_u32();
            (res_id, chan.recv_fd())
        };
        debug!(
            "created blob res_id={} type={:?} flags={:?} size={}",
            res_id, blob_type, blob_flags, size
        );

        Ok(Self {
            conn: Arc::clone(conn),
            blob_flags,
            size,
            state: Mutex::new(ResourceState {
                res_id,
                fd: Some(fd),
                mapping: None,
            }),
        })
    }

    /// A mappable guest-memory blob for CPU-side staging.
    pub fn create_cpu(conn: &Arc<Connection>, size: u64) -> Result<Self, RendererError> {
        Self::create_blob(conn, BlobType::Guest, BlobFlags::MAPPABLE, size, 0)
    }

    /// A host allocation backing the device memory object `mem_id`.
    pub fn create_gpu(
        conn: &Arc<Connection>,
        size: u64,
        mem_id: u64,
        properties: vk::MemoryPropertyFlags,
        external_handles: vk::ExternalMemoryHandleTypeFlags,
    ) -> Result<Self, RendererError> {
        let flags = blob_flags_for(properties, external_handles);
        Self::create_blob(conn, BlobType::Host3d, flags, size, mem_id)
    }

    /// Host id, 0 once destroyed.
    pub fn res_id(&self) -> u32 {
        self.state.lock().res_id
    }

    pub fn blob_flags(&self) -> BlobFlags {
        self.blob_flags
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the granted descriptor is still held.
    pub fn has_fd(&self) -> bool {
        self.state.lock().fd.is_some()
    }

    /// The held descriptor's number, for diagnostics. The descriptor stays
    /// owned by the resource.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.state.lock().fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_mapped(&self) -> bool {
        self.state.lock().mapping.is_some()
    }

    /// Map the blob and return its base address.
    ///
    /// The first successful call establishes the mapping; later calls return
    /// the same address. Unless the blob is shareable the descriptor is closed
    /// once mapped.
    pub fn map(&self) -> Result<NonNull<u8>, RendererError> {
        let mut state = self.state.lock();
        if let Some(mapping) = &state.mapping {
            return Ok(mapping.ptr);
        }

        if !self.blob_flags.contains(BlobFlags::MAPPABLE) {
            error!("res_id={} is not mappable", state.res_id);
            return Err(RendererError::OutOfHostMemory);
        }
        let Some(fd) = state.fd.as_ref() else {
            error!("res_id={} has no descriptor to map", state.res_id);
            return Err(RendererError::OutOfHostMemory);
        };
        let Some(len) = usize::try_from(self.size).ok().and_then(NonZeroUsize::new) else {
            error!("res_id={} has unmappable size {}", state.res_id, self.size);
            return Err(RendererError::OutOfHostMemory);
        };

        let mapping = match MappedRegion::map(fd, len) {
            Ok(mapping) => mapping,
            Err(e) => {
                error!(
                    "failed to mmap {} bytes of res_id={} (fd {}): {}",
                    len,
                    state.res_id,
                    fd.as_raw_fd(),
                    e
                );
                return Err(RendererError::OutOfHostMemory);
            }
        };
        let ptr = mapping.ptr;
        state.mapping = Some(mapping);
        if !self.blob_flags.contains(BlobFlags::SHAREABLE) {
            state.fd = None;
        }
        Ok(ptr)
    }

    /// A new close-on-exec descriptor for the blob, when it is shareable.
    pub fn export_dmabuf(&self) -> Option<OwnedFd> {
        if !self.blob_flags.contains(BlobFlags::SHAREABLE) {
            return None;
        }
        let state = self.state.lock();
        match state.fd.as_ref()?.try_clone() {
            Ok(fd) => Some(fd),
            Err(e) => {
                warn!("failed to duplicate fd of res_id={}: {}", state.res_id, e);
                None
            }
        }
    }

    /// Shared mappings are coherent; nothing to do.
    pub fn invalidate(&self) {}

    /// Shared mappings are coherent; nothing to do.
    pub fn flush(&self) {}

    /// Unmap, close the descriptor and release the host blob.
    pub fn destroy(&self) {
        let (res_id, mapping, fd) = {
            let mut state = self.state.lock();
            let res_id = std::mem::take(&mut state.res_id);
            (res_id, state.mapping.take(), state.fd.take())
        };
        drop(mapping);
        drop(fd);

        if res_id == 0 {
            return;
        }
        match (Request::ResourceUnref { res_id }).encode() {
            Ok(frame) => self.conn.lock().write_frame(&frame),
            Err(e) => error!("failed to encode unref for res_id={}: {}", res_id, e),
        }
        debug!("destroyed blob res_id={}", res_id);
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Resource")
            .field("res_id", &state.res_id)
            .field("blob_flags", &self.blob_flags)
            .field("size", &self.size)
            .field("mapped", &state.mapping.is_some())
            .finish()
    }
}
