// gpu/mod.rs — GPU offload layer.
//
// wgpu-based compute dispatch mirroring the CPU reference in
// crate::dispatch. The CPU implementation remains authoritative — the GPU
// path is validated against it byte-for-byte in the dispatch tests.
//
// A dispatch stages the frame to device memory, covers it with a grid of
// fixed-size tiles (ceiling division, shader-side edge guard), runs the
// transform once per pixel, and reads the result back. Device memory lives
// exactly as long as the dispatch; every exit path releases it.

pub mod buffers;
pub mod device;
pub mod dispatch;
