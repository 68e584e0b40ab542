// gpu/buffers.rs — device frame buffers and host↔device staging.
//
// THE WORD-PACKING PROBLEM
// ─────────────────────────
// The host layout is 3 bytes per pixel, tightly packed:
//
//   host:   [R G B][R G B][R G B][R G B] ...
//
// WGSL cannot address individual bytes — storage buffers are read and
// written in 32-bit words — and a 3-byte pixel straddles word boundaries,
// so two neighboring invocations would have to read-modify-write the same
// output word: a data race. Strategy: stage every pixel into its own word.
//
//   device: [R G B ·][R G B ·][R G B ·][R G B ·] ...
//
// Each invocation then owns exactly one input word and one output word
// (read via unpack4x8unorm, written via pack4x8unorm; the padding byte is
// written as zero and discarded on unpack). The pack on upload and unpack
// on readback are CPU memcpy-bound, once per dispatch — the same cost
// profile as compacting strided rows before a texture upload.
//
// Device buffer sizes are therefore pixel_count * 4 bytes for input,
// output, and readback alike. All three live exactly as long as one
// dispatch: `FrameBuffers` is created on entry and dropped on every exit
// path, taking the device memory with it.

use crate::gpu::device::{GpuDevice, GpuError};
use wgpu::util::DeviceExt;

/// Bytes per pixel on the device (RGBX — one u32 word).
pub(crate) const WORD_BYTES: usize = 4;

/// Bytes per pixel on the host (interleaved RGB).
const HOST_BYTES: usize = crate::image::CHANNELS;

// ---------------------------------------------------------------------------
// Pack / unpack
// ---------------------------------------------------------------------------

/// Widen interleaved RGB bytes to one RGBX word per pixel.
///
/// `host.len()` must be `n_pixels * 3`; the result is `n_pixels * 4` bytes
/// with the padding byte zeroed. Word layout is little-endian, matching
/// what `unpack4x8unorm` expects: R in the low byte.
pub(crate) fn pack_rgbx(host: &[u8], n_pixels: usize) -> Vec<u8> {
    debug_assert_eq!(host.len(), n_pixels * HOST_BYTES);
    let mut staged = vec![0u8; n_pixels * WORD_BYTES];
    for i in 0..n_pixels {
        staged[i * WORD_BYTES..i * WORD_BYTES + HOST_BYTES]
            .copy_from_slice(&host[i * HOST_BYTES..(i + 1) * HOST_BYTES]);
    }
    staged
}

/// Strip the padding byte from each RGBX word, recovering interleaved RGB.
pub(crate) fn unpack_rgbx(words: &[u8], n_pixels: usize) -> Vec<u8> {
    debug_assert_eq!(words.len(), n_pixels * WORD_BYTES);
    let mut host = vec![0u8; n_pixels * HOST_BYTES];
    for i in 0..n_pixels {
        host[i * HOST_BYTES..(i + 1) * HOST_BYTES]
            .copy_from_slice(&words[i * WORD_BYTES..i * WORD_BYTES + HOST_BYTES]);
    }
    host
}

// ---------------------------------------------------------------------------
// FrameBuffers
// ---------------------------------------------------------------------------

/// The three device-side buffers of one in-flight dispatch: staged input,
/// kernel output, and the mappable readback target.
///
/// Exclusively owned by one dispatch — concurrent dispatches each create
/// their own. Dropping the struct releases all device memory; there is no
/// explicit free path to forget.
pub(crate) struct FrameBuffers {
    pub input: wgpu::Buffer,
    pub output: wgpu::Buffer,
    pub readback: wgpu::Buffer,
    /// Size of each buffer in bytes (pixel_count * 4).
    pub word_bytes: u64,
}

impl FrameBuffers {
    /// Allocate the three buffers and upload `staged` (RGBX words) as the
    /// input contents.
    ///
    /// Runs under an out-of-memory error scope: if the device cannot
    /// satisfy the request, this returns [`GpuError::Allocation`] instead
    /// of proceeding with invalid buffers, and anything created before the
    /// failure is released on return.
    pub fn create(gpu: &GpuDevice, staged: &[u8]) -> Result<Self, GpuError> {
        let word_bytes = staged.len() as u64;

        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let input = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("tessera input"),
                contents: staged,
                usage: wgpu::BufferUsages::STORAGE,
            });

        let output = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessera output"),
            size: word_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessera readback"),
            size: word_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(GpuError::Allocation(err.to_string()));
        }

        Ok(FrameBuffers {
            input,
            output,
            readback,
            word_bytes,
        })
    }

    /// Map the readback buffer and copy its contents to host memory.
    ///
    /// Synchronous: blocks until the GPU timeline reaches the copy that
    /// filled the buffer. The caller must have submitted that copy before
    /// calling this. Map failure is surfaced as [`GpuError::Transfer`].
    pub fn read_words(&self, gpu: &GpuDevice) -> Result<Vec<u8>, GpuError> {
        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // Receiver outlives the poll below; a send can only fail if the
            // dispatch already bailed, in which case the result is moot.
            let _ = tx.send(result);
        });

        gpu.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| GpuError::Transfer("readback map callback never fired".into()))?
            .map_err(|e| GpuError::Transfer(e.to_string()))?;

        let mapped = slice.get_mapped_range();
        let words = mapped.to_vec();
        drop(mapped);
        self.readback.unmap();

        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Pack / unpack (pure, no GPU needed) -------------------------------

    #[test]
    fn test_pack_widens_each_pixel() {
        let host = [1u8, 2, 3, 4, 5, 6];
        let staged = pack_rgbx(&host, 2);
        assert_eq!(staged, vec![1, 2, 3, 0, 4, 5, 6, 0]);
    }

    #[test]
    fn test_unpack_strips_padding() {
        let words = [1u8, 2, 3, 0, 4, 5, 6, 0];
        let host = unpack_rgbx(&words, 2);
        assert_eq!(host, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let host: Vec<u8> = (0..51 * 3).map(|i| (i % 256) as u8).collect();
        let staged = pack_rgbx(&host, 51);
        assert_eq!(staged.len(), 51 * 4);
        assert_eq!(unpack_rgbx(&staged, 51), host);
    }

    #[test]
    fn test_unpack_ignores_padding_value() {
        // The kernel writes the padding byte as zero, but readback must not
        // depend on that.
        let words = [9u8, 8, 7, 255];
        assert_eq!(unpack_rgbx(&words, 1), vec![9, 8, 7]);
    }

    #[test]
    fn test_pack_empty() {
        assert!(pack_rgbx(&[], 0).is_empty());
        assert!(unpack_rgbx(&[], 0).is_empty());
    }
}
