// dispatch.rs — CPU reference dispatcher.
//
// A serial per-pixel map over an RgbImage. This is the authoritative
// definition of what a dispatch computes — the GPU path in gpu/dispatch.rs
// is validated against it byte-for-byte. It is also the fallback the FFI
// entry point uses on machines with no usable GPU.
//
// There is nothing to partition or stage here, so the function is total:
// a zero-sized image maps to a zero-sized image. Dimension validation for
// the GPU path (which must reject bad frames before allocating device
// memory) lives with the GPU dispatcher; validation of raw FFI arguments
// lives in ffi.rs.

use crate::image::RgbImage;
use crate::transform::PixelTransform;

/// Apply `transform` to every pixel of `input`, producing a fresh output
/// image of the same dimensions.
///
/// Pixels are independent; this reference implementation visits them in
/// row-major order, but no transform may rely on that.
pub fn dispatch_cpu(input: &RgbImage, transform: &dyn PixelTransform) -> RgbImage {
    let mut out = RgbImage::new(input.width(), input.height());
    for y in 0..input.height() {
        for x in 0..input.width() {
            out.set(x, y, transform.apply(input.get(x, y)));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Identity;

    fn gradient(width: usize, height: usize) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.set(x, y, [
                    (x * 7 % 256) as u8,
                    (y * 13 % 256) as u8,
                    ((x + y) * 31 % 256) as u8,
                ]);
            }
        }
        img
    }

    #[test]
    fn test_identity_is_byte_exact() {
        let img = gradient(32, 24);
        let out = dispatch_cpu(&img, &Identity);
        assert_eq!(out.as_slice(), img.as_slice());
    }

    #[test]
    fn test_identity_is_idempotent() {
        let img = gradient(20, 10);
        let once = dispatch_cpu(&img, &Identity);
        let twice = dispatch_cpu(&once, &Identity);
        assert_eq!(twice.as_slice(), once.as_slice());
    }

    #[test]
    fn test_non_tile_multiple_dimensions() {
        // 17×3: neither dimension is a multiple of the 16-pixel tile. All
        // 51 pixels (153 bytes) must appear unchanged in the output.
        let img = gradient(17, 3);
        let out = dispatch_cpu(&img, &Identity);
        assert_eq!(out.byte_len(), 17 * 3 * 3);
        assert_eq!(out.as_slice(), img.as_slice());
    }

    #[test]
    fn test_single_pixel() {
        let img = RgbImage::from_vec(1, 1, vec![9, 8, 7]);
        let out = dispatch_cpu(&img, &Identity);
        assert_eq!(out.as_slice(), &[9, 8, 7]);
    }

    #[test]
    fn test_2x2_rgb_scenario() {
        let bytes = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let img = RgbImage::from_vec(2, 2, bytes.clone());
        let out = dispatch_cpu(&img, &Identity);
        assert_eq!(out.as_slice(), bytes.as_slice());
    }

    #[test]
    fn test_zero_sized_image() {
        let img = RgbImage::new(0, 0);
        let out = dispatch_cpu(&img, &Identity);
        assert_eq!(out.byte_len(), 0);
    }

    struct ChannelSwap;

    impl PixelTransform for ChannelSwap {
        fn name(&self) -> &str {
            "channel_swap"
        }

        fn apply(&self, rgb: [u8; 3]) -> [u8; 3] {
            [rgb[2], rgb[0], rgb[1]]
        }

        fn wgsl_body(&self) -> &str {
            "return rgb.brg;"
        }
    }

    #[test]
    fn test_custom_transform_applies_per_pixel() {
        let img = RgbImage::from_vec(2, 1, vec![1, 2, 3, 4, 5, 6]);
        let out = dispatch_cpu(&img, &ChannelSwap);
        assert_eq!(out.as_slice(), &[3, 1, 2, 6, 4, 5]);
    }
}
