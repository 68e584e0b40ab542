// demos/identity_roundtrip.rs — CPU vs GPU identity dispatch, visualised.
//
// Runs the identity transform over a generated test scene on both paths,
// checks byte equality, and shows input and GPU output side by side in a
// minifb window. If the two halves look different, something is very wrong.
//
// USAGE
// ─────
//   cargo run --example identity_roundtrip            # 640×480 scene
//   cargo run --example identity_roundtrip -- 752 480 # custom dimensions

use minifb::{Key, Window, WindowOptions};

use tessera::dispatch::dispatch_cpu;
use tessera::gpu::device::GpuDevice;
use tessera::gpu::dispatch::GpuPixelDispatcher;
use tessera::image::RgbImage;
use tessera::transform::Identity;

fn make_scene(w: usize, h: usize) -> RgbImage {
    let mut img = RgbImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            img.set(x, y, [
                (x * 255 / w) as u8,
                (y * 255 / h) as u8,
                ((x ^ y) % 256) as u8,
            ]);
        }
    }
    img
}

/// Interleaved RGB → minifb's 0RGB u32 framebuffer format.
fn to_framebuffer(img: &RgbImage) -> Vec<u32> {
    img.pixels()
        .map(|(_, _, [r, g, b])| ((r as u32) << 16) | ((g as u32) << 8) | b as u32)
        .collect()
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let width: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(640);
    let height: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(480);

    eprintln!("[identity_roundtrip] scene: {width}×{height}");
    let src = make_scene(width, height);

    // --- CPU reference ---
    let cpu_out = dispatch_cpu(&src, &Identity);
    assert_eq!(
        cpu_out.as_slice(),
        src.as_slice(),
        "CPU identity is not byte-exact"
    );
    eprintln!("[identity_roundtrip] CPU identity: byte-exact");

    // --- GPU dispatch ---
    eprintln!("[identity_roundtrip] initialising GPU...");
    let gpu = GpuDevice::new().expect("failed to initialise a Vulkan GPU");
    eprintln!("[identity_roundtrip] GPU: {}", gpu.adapter_info);

    let dispatcher = GpuPixelDispatcher::new(&gpu, &Identity);
    let gpu_out = dispatcher.dispatch(&gpu, &src).expect("GPU dispatch failed");

    let mismatches = src
        .as_slice()
        .iter()
        .zip(gpu_out.as_slice())
        .filter(|(a, b)| a != b)
        .count();
    if mismatches == 0 {
        eprintln!("[identity_roundtrip] GPU identity: byte-exact");
    } else {
        eprintln!("[identity_roundtrip] GPU identity: {mismatches} byte mismatches!");
    }

    // --- Side-by-side view: input | GPU output ---
    let mut framebuffer = vec![0u32; width * 2 * height];
    let left = to_framebuffer(&src);
    let right = to_framebuffer(&gpu_out);
    for y in 0..height {
        framebuffer[y * width * 2..y * width * 2 + width]
            .copy_from_slice(&left[y * width..(y + 1) * width]);
        framebuffer[y * width * 2 + width..(y + 1) * width * 2]
            .copy_from_slice(&right[y * width..(y + 1) * width]);
    }

    let mut window = Window::new(
        "tessera identity roundtrip — input | GPU output (Esc to quit)",
        width * 2,
        height,
        WindowOptions::default(),
    )
    .expect("failed to open window");

    while window.is_open() && !window.is_key_down(Key::Escape) {
        window
            .update_with_buffer(&framebuffer, width * 2, height)
            .expect("window update failed");
    }
}
