// transform.rs — The pluggable per-pixel capability.
//
// A transform is defined TWICE, on purpose:
//
//   apply()     — CPU semantics over raw channel bytes. This is the
//                 authoritative reference; the GPU kernel is validated
//                 against it byte-for-byte.
//   wgsl_body() — the body of the WGSL function
//                     fn transform_pixel(rgb: vec3<f32>) -> vec3<f32>
//                 spliced into src/shaders/transform.wgsl at pipeline
//                 creation time, operating on normalized [0, 1] channels.
//
// The two must agree after quantization. The GPU side reaches the transform
// through unpack4x8unorm and leaves through pack4x8unorm; the CPU mirrors of
// those conversions are `channel_to_unorm` / `unorm_to_channel` below. A
// correct transform satisfies, for every byte triple:
//
//   apply([r, g, b]) == quantize(wgsl_body(normalize([r, g, b])))
//
// The unorm8 round trip is exact for all 256 byte values (255 * k/255
// re-rounds to k), so the identity transform is byte-exact on both paths.

/// A per-pixel transform: output channel bytes computed from one pixel's
/// input channel bytes, independent of all other pixels.
///
/// Implementations must be pure — the dispatcher may invoke `apply` in any
/// order and the GPU runs all pixels concurrently.
pub trait PixelTransform {
    /// Short name used in labels and log lines.
    fn name(&self) -> &str;

    /// CPU reference semantics: map one pixel's `[R, G, B]` to the output
    /// triple. Must be the quantized counterpart of `wgsl_body` — see the
    /// module header.
    fn apply(&self, rgb: [u8; 3]) -> [u8; 3];

    /// Body of the WGSL `transform_pixel` function. `rgb` is a
    /// `vec3<f32>` with channels in [0, 1]; the body must `return` a
    /// `vec3<f32>` in the same range (values outside it are clamped by the
    /// unorm pack on write).
    fn wgsl_body(&self) -> &str;
}

/// The identity transform: every pixel passes through unchanged.
///
/// This is the reference kernel's behavior and the one transform the crate
/// ships — anything else is the caller's to define.
pub struct Identity;

impl PixelTransform for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, rgb: [u8; 3]) -> [u8; 3] {
        rgb
    }

    fn wgsl_body(&self) -> &str {
        "return rgb;"
    }
}

// ---------------------------------------------------------------------------
// CPU mirrors of the WGSL unorm8 conversions
// ---------------------------------------------------------------------------

/// CPU mirror of WGSL `unpack4x8unorm` for one channel: byte → [0, 1].
#[inline]
pub fn channel_to_unorm(byte: u8) -> f32 {
    byte as f32 / 255.0
}

/// CPU mirror of WGSL `pack4x8unorm` for one channel: clamp to [0, 1],
/// then round to the nearest of the 256 representable levels.
#[inline]
pub fn unorm_to_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u8
}
