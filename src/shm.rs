//! Shared-memory buffers for surface contents.
//!
//! Every buffer gets its own sealed memfd and wl_shm_pool, mapped for the
//! lifetime of the buffer. Pixels are ARGB8888 at the window's buffer
//! scale; all sizes entering this module are already in pixels.

use std::os::fd::{AsFd, OwnedFd};
use std::{ptr, slice};

use rustix::fs::{fcntl_add_seals, ftruncate, memfd_create, MemfdFlags, SealFlags};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use wayland_client::protocol::wl_buffer::WlBuffer;
use wayland_client::protocol::wl_shm::{Format, WlShm};
use wayland_client::protocol::wl_shm_pool::WlShmPool;
use wayland_client::{Dispatch, Proxy, QueueHandle};

use crate::utils::Region;

#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("Failed to allocate shared memory: {0}")]
    Allocate(#[source] rustix::io::Errno),
    #[error("Failed to map shared memory: {0}")]
    Map(#[source] rustix::io::Errno),
    #[error("Buffer dimensions {0}x{1} overflow the pool size")]
    SizeOverflow(i32, i32),
}

const BYTES_PER_PIXEL: i32 = 4;

/// An anonymous, sealed, mapped memory file.
#[derive(Debug)]
struct MappedMemory {
    fd: OwnedFd,
    ptr: *mut u8,
    len: usize,
}

impl MappedMemory {
    fn allocate(len: usize) -> Result<(OwnedFd, *mut u8), ShmError> {
        let fd = memfd_create(
            "cdk-wayland-shm",
            MemfdFlags::CLOEXEC | MemfdFlags::ALLOW_SEALING,
        )
        .map_err(ShmError::Allocate)?;
        ftruncate(&fd, len as u64).map_err(ShmError::Allocate)?;
        // The compositor maps this fd; sealing shrink protects it from us.
        fcntl_add_seals(&fd, SealFlags::SHRINK).map_err(ShmError::Allocate)?;

        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
            .map_err(ShmError::Map)?
        };

        Ok((fd, ptr.cast()))
    }

    fn new(len: usize) -> Result<Self, ShmError> {
        let (fd, ptr) = Self::allocate(len)?;
        Ok(MappedMemory { fd, ptr, len })
    }

    fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for MappedMemory {
    fn drop(&mut self) {
        let _ = unsafe { munmap(self.ptr.cast(), self.len) };
    }
}

// The mapping is plain memory shared with the compositor, which only reads
// it between attach and release.
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

/// A single wl_buffer backed by its own pool and mapping.
#[derive(Debug)]
pub struct ShmBuffer {
    memory: MappedMemory,
    pool: WlShmPool,
    buffer: WlBuffer,
    width: i32,
    height: i32,
    stride: i32,
    scale: i32,
}

impl ShmBuffer {
    /// Allocates a buffer of `width`x`height` logical pixels at `scale`.
    pub fn new<D, U>(
        shm: &WlShm,
        qh: &QueueHandle<D>,
        udata: U,
        width: i32,
        height: i32,
        scale: i32,
    ) -> Result<Self, ShmError>
    where
        D: Dispatch<WlShmPool, ()> + Dispatch<WlBuffer, U> + 'static,
        U: Send + Sync + 'static,
    {
        let pixel_width = width * scale;
        let pixel_height = height * scale;
        let stride = pixel_width
            .checked_mul(BYTES_PER_PIXEL)
            .ok_or(ShmError::SizeOverflow(width, height))?;
        let size = stride
            .checked_mul(pixel_height)
            .filter(|size| *size > 0)
            .ok_or(ShmError::SizeOverflow(width, height))?;

        let memory = MappedMemory::new(size as usize)?;
        let pool = shm.create_pool(memory.fd.as_fd(), size, qh, ());
        let buffer = pool.create_buffer(
            0,
            pixel_width,
            pixel_height,
            stride,
            Format::Argb8888,
            qh,
            udata,
        );

        Ok(ShmBuffer {
            memory,
            pool,
            buffer,
            width,
            height,
            stride,
            scale,
        })
    }

    pub fn wl_buffer(&self) -> &WlBuffer {
        &self.buffer
    }

    /// Stable identity of the underlying protocol object, used to match
    /// release events against the buffer slots.
    pub fn id(&self) -> wayland_client::backend::ObjectId {
        self.buffer.id()
    }

    pub fn logical_size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }

    pub fn canvas(&mut self) -> &mut [u8] {
        self.memory.bytes_mut()
    }

    /// Copies `region` (logical coordinates) from another buffer of the
    /// same size and scale. Used to backfill undamaged pixels before a
    /// partial repaint.
    pub fn copy_region_from(&mut self, source: &ShmBuffer, region: &Region) {
        debug_assert_eq!((self.width, self.height), (source.width, source.height));
        debug_assert_eq!(self.scale, source.scale);

        let scale = self.scale;
        let stride = self.stride as usize;
        let pixel_width = self.width * scale;
        let pixel_height = self.height * scale;
        let src = source.memory.bytes();
        let dst = self.memory.bytes_mut();

        for rect in region.rects() {
            let x0 = (rect.x * scale).clamp(0, pixel_width) as usize * BYTES_PER_PIXEL as usize;
            let x1 = (rect.right() * scale).clamp(0, pixel_width) as usize * BYTES_PER_PIXEL as usize;
            let y0 = (rect.y * scale).clamp(0, pixel_height);
            let y1 = (rect.bottom() * scale).clamp(0, pixel_height);
            if x1 <= x0 {
                continue;
            }
            for row in y0..y1 {
                let offset = row as usize * stride;
                dst[offset + x0..offset + x1].copy_from_slice(&src[offset + x0..offset + x1]);
            }
        }
    }

    /// Destroys the protocol objects. The mapping goes away with the value.
    pub fn destroy(self) {
        self.buffer.destroy();
        self.pool.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_memory_is_writable_and_shared() {
        let mut memory = MappedMemory::new(4096).unwrap();
        memory.bytes_mut()[0] = 0xab;
        memory.bytes_mut()[4095] = 0xcd;
        assert_eq!(memory.bytes()[0], 0xab);
        assert_eq!(memory.bytes()[4095], 0xcd);
    }

    #[test]
    fn mapped_memory_starts_zeroed() {
        let memory = MappedMemory::new(1024).unwrap();
        assert!(memory.bytes().iter().all(|b| *b == 0));
    }
}
