// gpu/dispatch.rs — GPU per-pixel transform dispatcher.
//
// One `GpuPixelDispatcher` wraps one compiled pipeline for one transform:
// the transform's WGSL body is spliced into the shader template at
// creation time, alongside the tile dimensions. Create once, dispatch per
// frame.
//
// A dispatch is three synchronous phases on one command stream:
//
//   upload (staged input)  →  compute pass  →  output→readback copy
//
// All three are recorded into a single submission, and wgpu orders them on
// the queue timeline: no invocation can observe a partially written input
// buffer, and the readback copy begins only after the whole grid has
// completed. The blocking point is the readback map at the end.
//
// Device memory (the three FrameBuffers) is scoped to the dispatch call —
// created after validation, dropped on every exit path including errors.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::gpu::buffers::{pack_rgbx, unpack_rgbx, FrameBuffers};
use crate::gpu::device::{GpuDevice, GpuError};
use crate::image::RgbImage;
use crate::transform::PixelTransform;

// Uniform params — must match WGSL struct Params exactly.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Params {
    width: u32,
    height: u32,
}

/// GPU per-pixel transform dispatcher.
///
/// Holds the compute pipeline compiled for one [`PixelTransform`]. The
/// pipeline is specialized to the device's tile size at creation; if the
/// tile size is changed afterwards, create a new dispatcher.
pub struct GpuPixelDispatcher {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    /// Name of the transform this pipeline was built for, used in labels.
    pub transform_name: String,
}

impl GpuPixelDispatcher {
    /// Compile the transform into a compute pipeline on the given device.
    pub fn new(gpu: &GpuDevice, transform: &dyn PixelTransform) -> Self {
        let shader_template = include_str!("../shaders/transform.wgsl");
        let shader_src = shader_template
            .replace("{{WG_X}}", &gpu.tile_size.x.to_string())
            .replace("{{WG_Y}}", &gpu.tile_size.y.to_string())
            .replace("{{TRANSFORM_BODY}}", transform.wgsl_body());

        let shader = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("transform.wgsl"),
            source: wgpu::ShaderSource::Wgsl(shader_src.into()),
        });

        let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tessera BGL"),
            entries: &[
                // 0 — staged input pixels (storage, read-only)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // 1 — output pixels (storage, read_write)
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // 2 — params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout =
            gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("tessera pipeline layout"),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });

        let pipeline =
            gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label:               Some("transform_main"),
                layout:              Some(&pipeline_layout),
                module:              &shader,
                entry_point:         "transform_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache:               None,
            });

        GpuPixelDispatcher {
            pipeline,
            bgl,
            transform_name: transform.name().to_string(),
        }
    }

    /// Run the transform over every pixel of `input` on the GPU and return
    /// the transformed image.
    ///
    /// Blocks until the result is resident in host memory. On any error the
    /// device buffers are released and no output is returned — never a
    /// partial frame.
    ///
    /// # Errors
    /// - [`GpuError::InvalidDimensions`] if width or height is zero
    ///   (rejected before any device allocation).
    /// - [`GpuError::Allocation`] if the device cannot satisfy the buffer
    ///   request.
    /// - [`GpuError::Transfer`] if the readback map fails.
    pub fn dispatch(&self, gpu: &GpuDevice, input: &RgbImage) -> Result<RgbImage, GpuError> {
        let width = input.width();
        let height = input.height();
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidDimensions { width, height });
        }
        let n_pixels = input.pixel_count();

        // Stage and allocate. FrameBuffers drops on every exit path below,
        // releasing all device memory with it.
        let staged = pack_rgbx(input.as_slice(), n_pixels);
        let frame = FrameBuffers::create(gpu, &staged)?;

        let params = Params {
            width: width as u32,
            height: height as u32,
        };
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tessera params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tessera BG"),
            layout: &self.bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: frame.input.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: frame.output.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: params_buf.as_entire_binding() },
            ],
        });

        let (grid_x, grid_y) = gpu.dispatch_size(width as u32, height as u32);
        let mut encoder = gpu.device.create_command_encoder(
            &wgpu::CommandEncoderDescriptor { label: Some("tessera dispatch") },
        );
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("transform_main"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid_x, grid_y, 1);
        }
        encoder.copy_buffer_to_buffer(&frame.output, 0, &frame.readback, 0, frame.word_bytes);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let words = frame.read_words(gpu)?;
        Ok(RgbImage::from_vec(width, height, unpack_rgbx(&words, n_pixels)))
    }
}
