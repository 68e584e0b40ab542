// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate Vulkan adapters and select the first non-CPU one.
//   - Expose a `DeviceProfile` for simulating constrained hardware limits
//     on a development machine.
//   - Provide `TileSize` — the 2-D tile the image is partitioned into for
//     dispatch, validated against the active profile.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` power-preference heuristics can grab
// llvmpipe/softpipe on WSL2, where the software renderer shows up as a valid
// Vulkan device. We enumerate explicitly and prefer real hardware, falling
// back through virtual/other adapters (dzn on WSL2) before taking anything.
//
// DEVICE LIMITS:
// Under a non-Native profile we request *lower* limits than the hardware
// supports. wgpu validates every dispatch against the requested limits, so a
// tile configuration that would crash on the target device is caught at dev
// time on the laptop.

use std::fmt;

/// Hardware profile controlling device limits and tile-size validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    /// Use the adapter's actual hardware limits. No artificial caps.
    Native,
    /// Simulate Raspberry Pi 4/5 (Broadcom VideoCore VI/VII, V3DV Vulkan):
    /// caps `max_compute_invocations_per_workgroup` at 256, matching the
    /// device report from RPi's V3DV driver.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// The fixed-size 2-D tile the image is partitioned into for dispatch.
///
/// One compute workgroup covers one tile; one invocation covers one pixel.
/// The product x * y must not exceed the profile's
/// `max_compute_invocations_per_workgroup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub x: u32,
    pub y: u32,
}

/// The default 16×16 tile. 256 invocations — four NVIDIA warps, two AMD
/// waves, and exactly the V3DV invocation cap, so the same tile runs on
/// every supported profile.
pub const DEFAULT_TILE: TileSize = TileSize { x: 16, y: 16 };

impl TileSize {
    /// Total invocations per tile (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }
}

impl fmt::Display for TileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {:?})",
            self.name, self.backend, self.device_type
        )
    }
}

/// The core GPU context: adapter, device, queue, and active profile.
///
/// Create via [`GpuDevice::new`] or [`GpuDevice::new_with_profile`]. Hold
/// one for the lifetime of the application — Vulkan instance + device
/// initialization is expensive; everything downstream borrows it.
///
/// # Field drop order
/// Rust drops struct fields in declaration order. `_instance` is declared
/// last so the `wgpu::Instance` outlives `device` and `queue` — dzn (the
/// D3D12-to-Vulkan layer on WSL2) crashes when the Vulkan instance is
/// destroyed while device-level objects still reference it.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    pub tile_size: TileSize,
    /// Keeps the `wgpu::Instance` alive until `device` and `queue` are
    /// dropped. Never accessed directly.
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a `GpuDevice` on the first non-CPU Vulkan adapter found, with
    /// `DeviceProfile::Native` limits and the default 16×16 tile.
    ///
    /// # Errors
    /// Returns `Err` if no suitable adapter is found or the device request
    /// fails.
    pub fn new() -> Result<Self, GpuError> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    /// Create a `GpuDevice` with an explicit hardware profile.
    pub fn new_with_profile(profile: DeviceProfile) -> Result<Self, GpuError> {
        pollster::block_on(Self::init_async(profile))
    }

    async fn init_async(profile: DeviceProfile) -> Result<Self, GpuError> {
        // Vulkan only — no DX12, no Metal, no WebGPU. dzn declares itself
        // non-conformant, which wgpu would drop by default;
        // ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER keeps it enumerable so WSL2
        // machines can still select it over llvmpipe. Compute-only work has
        // no reliance on conformance-gated rendering behavior.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        let all_adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .collect();

        if all_adapters.is_empty() {
            return Err(GpuError::NoSuitableAdapter);
        }

        for a in &all_adapters {
            let info = a.get_info();
            eprintln!(
                "[tessera] Vulkan adapter: {} ({:?}, {:?})",
                info.name, info.backend, info.device_type
            );
        }

        // Tier 1: real or passable hardware. Tier 2: whatever exists, even
        // a software rasterizer — the adapter name is logged either way.
        let adapter = all_adapters
            .into_iter()
            .find(|a| {
                matches!(
                    a.get_info().device_type,
                    wgpu::DeviceType::DiscreteGpu
                        | wgpu::DeviceType::IntegratedGpu
                        | wgpu::DeviceType::VirtualGpu
                        | wgpu::DeviceType::Other
                )
            })
            .or_else(|| {
                instance
                    .enumerate_adapters(wgpu::Backends::VULKAN)
                    .into_iter()
                    .next()
            })
            .ok_or(GpuError::NoSuitableAdapter)?;

        let raw_info = adapter.get_info();
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        // Auto-upgrade to the RPi profile when the adapter is V3D, so
        // GpuDevice::new() does the right thing on the device itself.
        let profile = match profile {
            DeviceProfile::Native if raw_info.name.to_ascii_lowercase().contains("v3d") => {
                eprintln!("[tessera] V3D adapter detected — using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        let limits = limits_for_profile(profile);

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tessera"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(GpuError::DeviceRequest)?;

        Ok(GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            tile_size: DEFAULT_TILE,
            _instance: instance,
        })
    }

    /// Override the default tile size, validating against the active
    /// profile's invocation limit.
    pub fn set_tile_size(&mut self, x: u32, y: u32) -> Result<(), GpuError> {
        let total = x * y;
        let max = max_invocations_for_profile(self.profile);
        if total > max {
            return Err(GpuError::TileTooLarge { total, max });
        }
        self.tile_size = TileSize { x, y };
        Ok(())
    }

    /// Compute the dispatch grid needed to cover an image of the given size
    /// with the active tile size.
    ///
    /// Returns `(grid_x, grid_y)` — workgroups per dimension, by ceiling
    /// division, so every pixel is covered even when the image dimensions
    /// are not tile multiples. The trailing tiles are partial; the shader
    /// must guard:
    /// ```wgsl
    /// if gid.x >= width || gid.y >= height { return; }
    /// ```
    pub fn dispatch_size(&self, img_w: u32, img_h: u32) -> (u32, u32) {
        let gx = (img_w + self.tile_size.x - 1) / self.tile_size.x;
        let gy = (img_h + self.tile_size.y - 1) / self.tile_size.y;
        (gx, gy)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, tile: {} }}",
            self.adapter_info, self.profile, self.tile_size
        )
    }
}

// ============================================================
// Limits helpers
// ============================================================

fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),

        DeviceProfile::RaspberryPi => wgpu::Limits {
            // VideoCore VI/VII: vulkaninfo reports 256 max invocations,
            // and caps individual workgroup dimensions at 256 too.
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            // Conservative storage binding cap: 128 MiB — RPi shares its
            // 4 GiB with the CPU, and one dispatch needs three frame-sized
            // buffers.
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

/// Maximum compute invocations per workgroup for the given profile.
/// Used to validate `set_tile_size()`.
fn max_invocations_for_profile(profile: DeviceProfile) -> u32 {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default().max_compute_invocations_per_workgroup,
        DeviceProfile::RaspberryPi => 256,
    }
}

// ============================================================
// Error type
// ============================================================

/// Errors from device initialization, configuration, and dispatch.
///
/// Every device operation that can report failure is checked: dimension
/// validation happens before any allocation, allocation runs under an
/// out-of-memory error scope, and the readback map result is propagated.
/// Nothing is retried — a failed dispatch returns an error and no output.
#[derive(Debug)]
pub enum GpuError {
    /// No Vulkan adapter found at all. On WSL2: check that Vulkan is
    /// installed and `vulkaninfo` lists a real GPU.
    NoSuitableAdapter,
    /// wgpu device request failed (driver issue, unsupported limits, etc.).
    DeviceRequest(wgpu::RequestDeviceError),
    /// Requested tile size exceeds the profile's invocation limit.
    TileTooLarge { total: u32, max: u32 },
    /// Frame rejected before any device allocation: width or height is
    /// zero.
    InvalidDimensions { width: usize, height: usize },
    /// Device memory request could not be satisfied. Fatal to the current
    /// dispatch; buffers created before the failure are released on return.
    Allocation(String),
    /// Device→host readback did not complete.
    Transfer(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoSuitableAdapter => write!(
                f,
                "no suitable Vulkan adapter found (only CPU/software renderers visible)"
            ),
            GpuError::DeviceRequest(e) => write!(f, "device request failed: {e}"),
            GpuError::TileTooLarge { total, max } => write!(
                f,
                "tile size {total} exceeds profile limit of {max} invocations"
            ),
            GpuError::InvalidDimensions { width, height } => write!(
                f,
                "invalid frame dimensions {width}×{height} (both must be nonzero)"
            ),
            GpuError::Allocation(msg) => write!(f, "device allocation failed: {msg}"),
            GpuError::Transfer(msg) => write!(f, "device transfer failed: {msg}"),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceRequest(e) => Some(e),
            _ => None,
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that require an actual GPU are behind `#[ignore]` so that
    // `cargo test` passes in CI without Vulkan. Run with:
    //   cargo test -- --include-ignored

    #[test]
    fn test_default_tile_is_16x16() {
        assert_eq!(DEFAULT_TILE.x, 16);
        assert_eq!(DEFAULT_TILE.y, 16);
        assert_eq!(DEFAULT_TILE.total(), 256);
        // Fits the constrained profile exactly.
        assert!(DEFAULT_TILE.total() <= max_invocations_for_profile(DeviceProfile::RaspberryPi));
    }

    #[test]
    fn test_dispatch_size_exact_multiple() {
        let stub = GpuDeviceStub::new();
        let (gx, gy) = stub.dispatch_size(640, 480);
        assert_eq!(gx, 640 / 16); // 40
        assert_eq!(gy, 480 / 16); // 30
    }

    #[test]
    fn test_dispatch_size_ceiling() {
        let stub = GpuDeviceStub::new();

        // 100×100 with a 16-pixel tile → ceil(100/16) = 7. The last tile
        // covers pixels 96–111; 100–111 are out of bounds and rely on the
        // shader guard.
        let (gx, gy) = stub.dispatch_size(100, 100);
        assert_eq!(gx, 7);
        assert_eq!(gy, 7);

        // The 17×3 edge case from the dispatch contract.
        let (gx, gy) = stub.dispatch_size(17, 3);
        assert_eq!(gx, 2);
        assert_eq!(gy, 1);

        // Single pixel → single tile.
        let (gx, gy) = stub.dispatch_size(1, 1);
        assert_eq!(gx, 1);
        assert_eq!(gy, 1);
    }

    #[test]
    fn test_rpi_limits_cap_invocations() {
        let limits = limits_for_profile(DeviceProfile::RaspberryPi);
        assert_eq!(limits.max_compute_invocations_per_workgroup, 256);
        assert_eq!(limits.max_compute_workgroup_size_x, 256);
    }

    #[test]
    fn test_native_limits_are_default() {
        let limits = limits_for_profile(DeviceProfile::Native);
        assert_eq!(limits, wgpu::Limits::default());
    }

    #[test]
    fn test_error_display() {
        let e = GpuError::InvalidDimensions { width: 0, height: 7 };
        assert!(e.to_string().contains("0×7"));
        let e = GpuError::TileTooLarge { total: 272, max: 256 };
        assert!(e.to_string().contains("272"));
    }

    // ---- GPU integration tests (subprocess isolation) ----------------------
    //
    // dzn (the D3D12-to-Vulkan layer on WSL2) SIGSEGVs in its own atexit
    // cleanup whenever a Vulkan device was created in the process,
    // independent of how we drop our wgpu objects. Workaround: run each GPU
    // test in a child `cargo test` process; the child prints "GPU_TEST_OK"
    // after its assertions, and the parent checks the output rather than
    // the exit code. On bare-metal Linux and RPi the children also exit
    // cleanly.

    fn run_gpu_test_in_subprocess(test_name: &str) -> String {
        let output = std::process::Command::new("cargo")
            .args([
                "test",
                "--lib",
                "--",
                test_name,
                "--exact",
                "--ignored",
                "--nocapture",
            ])
            .output()
            .unwrap_or_else(|e| panic!("failed to spawn subprocess for {test_name}: {e}"));

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        print!("{stdout}");
        eprint!("{stderr}");
        stdout + &stderr
    }

    // Inner tests — run only inside the subprocess.

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_device_init_native() {
        let gpu = GpuDevice::new().expect("should initialise a Vulkan device");
        println!("{gpu}");
        assert_eq!(gpu.tile_size, DEFAULT_TILE);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_device_init_rpi_profile() {
        let gpu = GpuDevice::new_with_profile(DeviceProfile::RaspberryPi)
            .expect("RPi profile should work on any Vulkan device");
        assert_eq!(gpu.profile, DeviceProfile::RaspberryPi);
        assert_eq!(gpu.tile_size, DEFAULT_TILE);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_set_tile_size_too_large() {
        let mut gpu = GpuDevice::new_with_profile(DeviceProfile::RaspberryPi).unwrap();
        let err = gpu.set_tile_size(16, 17).unwrap_err();
        assert!(matches!(err, GpuError::TileTooLarge { total: 272, max: 256 }));
        println!("GPU_TEST_OK");
    }

    // Outer wrappers — spawn one subprocess each.

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_device_init_native() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_device_init_native");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_device_init_rpi_profile() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_device_init_rpi_profile");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real Vulkan GPU"]
    fn test_set_tile_size_too_large() {
        let out = run_gpu_test_in_subprocess("gpu::device::tests::inner_set_tile_size_too_large");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    // ---- Stub for pure dispatch-size tests ----
    // dispatch_size() is a pure function of TileSize — no GPU needed.
    struct GpuDeviceStub {
        tile_size: TileSize,
    }

    impl GpuDeviceStub {
        fn new() -> Self {
            GpuDeviceStub { tile_size: DEFAULT_TILE }
        }

        fn dispatch_size(&self, img_w: u32, img_h: u32) -> (u32, u32) {
            let gx = (img_w + self.tile_size.x - 1) / self.tile_size.x;
            let gy = (img_h + self.tile_size.y - 1) / self.tile_size.y;
            (gx, gy)
        }
    }
}
