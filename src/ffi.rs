// ffi.rs — C ABI entry point.
//
// The crate builds as a cdylib so host-language code can call the dispatch
// without knowing anything about Rust. The surface is one function over
// caller-allocated buffers plus integer status codes — no Rust types cross
// the boundary.
//
// RUNTIME LIFETIME:
// Device initialization is far too expensive to do per call, so the first
// call builds a process-wide runtime (GPU device + identity pipeline) and
// every later call reuses it. `OnceLock` gives us exactly-once lazy init
// without a static constructor; the `Mutex` serializes dispatches through
// the shared pipeline. If GPU initialization fails — no Vulkan, software
// rasterizer only, driver trouble — the runtime degrades to the CPU
// reference path once and logs it, and the entry point keeps working.
//
// NEW RUST CONCEPTS:
// - `#[no_mangle] extern "C"` — exports the symbol with its literal name
//   and C calling convention, so dlsym/ctypes/P-Invoke can find it.
// - `std::slice::from_raw_parts` — views a raw pointer + length as a &[u8]
//   without copying. The length is trusted, hence the unsafe contract.

use std::sync::{Mutex, OnceLock};

use crate::dispatch::dispatch_cpu;
use crate::gpu::device::GpuDevice;
use crate::gpu::dispatch::GpuPixelDispatcher;
use crate::image::{RgbImage, CHANNELS};
use crate::transform::Identity;

/// Dispatch completed; the output buffer holds the transformed frame.
pub const TESSERA_OK: i32 = 0;
/// Null pointer, non-positive dimension, or byte-length overflow. Nothing
/// was read or written.
pub const TESSERA_ERR_INVALID_ARGS: i32 = 1;
/// Device allocation or transfer failed. The output buffer is untouched —
/// never partially written.
pub const TESSERA_ERR_DISPATCH: i32 = 2;

enum Backend {
    Gpu {
        gpu: GpuDevice,
        identity: GpuPixelDispatcher,
    },
    Cpu,
}

static RUNTIME: OnceLock<Mutex<Backend>> = OnceLock::new();

fn runtime() -> &'static Mutex<Backend> {
    RUNTIME.get_or_init(|| {
        let backend = match GpuDevice::new() {
            Ok(gpu) => {
                let identity = GpuPixelDispatcher::new(&gpu, &Identity);
                eprintln!("[tessera] FFI runtime: GPU backend ({})", gpu.adapter_info);
                Backend::Gpu { gpu, identity }
            }
            Err(e) => {
                eprintln!(
                    "[tessera] FFI runtime: GPU unavailable ({e}) — using CPU reference path"
                );
                Backend::Cpu
            }
        };
        Mutex::new(backend)
    })
}

/// Run the identity transform over an interleaved RGB frame.
///
/// `input` and `output` are caller-allocated buffers of exactly
/// `width * height * 3` bytes; `output` is populated in place. Returns
/// [`TESSERA_OK`] on success, a `TESSERA_ERR_*` code otherwise. On error
/// the output buffer is never partially written.
///
/// The first call initializes the process-wide runtime (GPU if available,
/// CPU reference path otherwise); calls are serialized internally and may
/// be made from any thread.
///
/// # Safety
/// Caller must guarantee that `input` is valid for reads and `output` is
/// valid for writes of `width * height * 3` bytes each, and that the
/// buffers do not overlap.
#[no_mangle]
pub unsafe extern "C" fn tessera_process_image(
    input: *const u8,
    output: *mut u8,
    width: i32,
    height: i32,
) -> i32 {
    if input.is_null() || output.is_null() || width <= 0 || height <= 0 {
        return TESSERA_ERR_INVALID_ARGS;
    }
    let (w, h) = (width as usize, height as usize);
    // checked_mul guards 32-bit targets, where w * h * 3 can wrap.
    let byte_len = match w.checked_mul(h).and_then(|n| n.checked_mul(CHANNELS)) {
        Some(n) => n,
        None => return TESSERA_ERR_INVALID_ARGS,
    };

    let input_slice = std::slice::from_raw_parts(input, byte_len);
    let img = RgbImage::from_vec(w, h, input_slice.to_vec());

    let result = {
        let backend = runtime().lock().unwrap_or_else(|p| p.into_inner());
        match &*backend {
            Backend::Gpu { gpu, identity } => identity.dispatch(gpu, &img),
            Backend::Cpu => Ok(dispatch_cpu(&img, &Identity)),
        }
    };

    match result {
        Ok(out) => {
            std::slice::from_raw_parts_mut(output, byte_len).copy_from_slice(out.as_slice());
            TESSERA_OK
        }
        Err(e) => {
            eprintln!("[tessera] FFI dispatch failed: {e}");
            TESSERA_ERR_DISPATCH
        }
    }
}
