// Tessera — tile-parallel per-pixel RGB transforms.
//
// A per-pixel transform is defined once as CPU semantics and once as a
// WGSL body; the CPU path (dispatch) is the authoritative reference, the
// GPU path (gpu::dispatch) offloads the same map to a compute grid of
// 16×16 tiles. A C ABI entry point (ffi) exposes the identity transform to
// host-language callers.

pub mod dispatch;
pub mod ffi;
pub mod gpu;
pub mod image;
pub mod transform;
