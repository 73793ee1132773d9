// renderer.rs — wgpu renderer: base materials, projected slots, frustum helpers, egui

use crate::depth_pass::{GpuDepthCapture, CAPTURE_FORMAT};
use image::RgbaImage;
use projection_mapper::error::RenderError;
use projection_mapper::material::{Texture, DEPTH_BIAS_ABSOLUTE, DEPTH_BIAS_RELATIVE};
use projection_mapper::operator::ViewCamera;
use projection_mapper::projection::{FrustumHelper, ProjectionId};
use projection_mapper::scene::{MaterialSlot, SurfaceId};
use projection_mapper::Stage;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::window::Window;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniform {
    view_proj: [[f32; 4]; 4],
    eye: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SurfaceUniform {
    color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ProjectorUniform {
    view_proj: [[f32; 4]; 4],
    color: [f32; 4],
    lens: [f32; 4],  // opacity, orthographic, near, far
    depth: [f32; 4], // has depth, relative bias, absolute bias, _
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct LineVertex {
    position: [f32; 3],
    color: [f32; 3],
}

/// World-space copy of one scene surface.
struct GpuSurface {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    revision: u64,
    uniform: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

struct GpuProjection {
    uniform: wgpu::Buffer,
    texture: wgpu::Texture,
    texture_key: Option<(usize, usize)>,
    depth_key: Option<usize>,
    bind_group: wgpu::BindGroup,
}

pub struct Renderer {
    surface: wgpu::Surface,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,
    depth_view: wgpu::TextureView,

    base_pipeline: wgpu::RenderPipeline,
    projected_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,

    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    surface_layout: wgpu::BindGroupLayout,
    projector_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    /// Bound until a projection's first capture lands.
    depth_placeholder: wgpu::TextureView,

    surfaces: HashMap<SurfaceId, GpuSurface>,
    projections: HashMap<ProjectionId, GpuProjection>,
    line_buffer: Option<(wgpu::Buffer, u32)>,

    // UI
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth_buffer"),
        size: wgpu::Extent3d {
            width: config.width.max(1),
            height: config.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

const POSITION_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 12,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
};

const LINE_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<LineVertex>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
};

struct PipelineDesc<'a> {
    label: &'a str,
    layout: &'a wgpu::PipelineLayout,
    shader: &'a wgpu::ShaderModule,
    vertex: &'a str,
    fragment: &'a str,
    buffer: wgpu::VertexBufferLayout<'a>,
    topology: wgpu::PrimitiveTopology,
    blend: wgpu::BlendState,
    depth_write: bool,
}

fn create_pipeline(device: &wgpu::Device, format: wgpu::TextureFormat, desc: PipelineDesc) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label),
        layout: Some(desc.layout),
        vertex: wgpu::VertexState {
            module: desc.shader,
            entry_point: desc.vertex,
            buffers: &[desc.buffer],
        },
        fragment: Some(wgpu::FragmentState {
            module: desc.shader,
            entry_point: desc.fragment,
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(desc.blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: desc.topology,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None, // surfaces are seen from both sides
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: desc.depth_write,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
    })
}

impl Renderer {
    pub async fn new(window: Arc<Window>) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = unsafe { instance.create_surface(window.as_ref()) }?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    label: None,
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        let depth_view = create_depth_view(&device, &config);

        // --- bind group layouts ---
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame_layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
        });
        let surface_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("surface_layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::FRAGMENT)],
        });
        let projector_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("projector_layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Depth,
                    },
                    count: None,
                },
            ],
        });

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("frame_uniform"),
            contents: bytemuck::cast_slice(&[FrameUniform {
                view_proj: glam::Mat4::IDENTITY.to_cols_array_2d(),
                eye: [0.0; 4],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_bind_group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        // Projected images are clamped: outside [0, 1] is already the fallback.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let depth_placeholder = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("projector_depth_placeholder"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: CAPTURE_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor {
                aspect: wgpu::TextureAspect::DepthOnly,
                ..Default::default()
            });

        // --- pipelines ---
        let scene_shader = device.create_shader_module(wgpu::include_wgsl!("shader_scene.wgsl"));
        let projected_shader = device.create_shader_module(wgpu::include_wgsl!("shader_projected.wgsl"));

        let base_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("base_layout"),
            bind_group_layouts: &[&frame_layout, &surface_layout],
            push_constant_ranges: &[],
        });
        let projected_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("projected_layout"),
            bind_group_layouts: &[&frame_layout, &projector_layout],
            push_constant_ranges: &[],
        });
        let line_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("line_layout"),
            bind_group_layouts: &[&frame_layout],
            push_constant_ranges: &[],
        });

        let base_pipeline = create_pipeline(
            &device,
            config.format,
            PipelineDesc {
                label: "base_pipeline",
                layout: &base_layout,
                shader: &scene_shader,
                vertex: "vs_main",
                fragment: "fs_base",
                buffer: POSITION_LAYOUT,
                topology: wgpu::PrimitiveTopology::TriangleList,
                blend: wgpu::BlendState::ALPHA_BLENDING,
                depth_write: true,
            },
        );
        // Slots stack over the base pass on identical geometry: LessEqual, no depth writes.
        let projected_pipeline = create_pipeline(
            &device,
            config.format,
            PipelineDesc {
                label: "projected_pipeline",
                layout: &projected_layout,
                shader: &projected_shader,
                vertex: "vs_main",
                fragment: "fs_projected",
                buffer: POSITION_LAYOUT,
                topology: wgpu::PrimitiveTopology::TriangleList,
                blend: wgpu::BlendState::ALPHA_BLENDING,
                depth_write: false,
            },
        );
        let line_pipeline = create_pipeline(
            &device,
            config.format,
            PipelineDesc {
                label: "line_pipeline",
                layout: &line_layout,
                shader: &scene_shader,
                vertex: "vs_line",
                fragment: "fs_line",
                buffer: LINE_LAYOUT,
                topology: wgpu::PrimitiveTopology::LineList,
                blend: wgpu::BlendState::REPLACE,
                depth_write: true,
            },
        );

        // --- egui ---
        let egui_ctx = egui::Context::default();
        let mut egui_state = egui_winit::State::new(window.as_ref());
        // high-DPI displays
        egui_state.set_pixels_per_point(window.scale_factor() as f32);
        let egui_renderer = egui_wgpu::Renderer::new(&device, config.format, None, 1);

        log::info!("renderer ready: {:?} {}x{}", surface_format, config.width, config.height);

        Ok(Self {
            surface,
            device: Arc::new(device),
            queue: Arc::new(queue),
            config,
            size,
            depth_view,
            base_pipeline,
            projected_pipeline,
            line_pipeline,
            frame_buffer,
            frame_bind_group,
            surface_layout,
            projector_layout,
            sampler,
            depth_placeholder,
            surfaces: HashMap::new(),
            projections: HashMap::new(),
            line_buffer: None,
            egui_ctx,
            egui_state,
            egui_renderer,
        })
    }

    /// Depth capture sharing this renderer's device. Its maps bind straight
    /// into the projected pipeline.
    pub fn depth_capture(&self, resolution: u32) -> GpuDepthCapture {
        GpuDepthCapture::new(self.device.clone(), self.queue.clone(), resolution)
    }

    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height.max(1) as f32
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.depth_view = create_depth_view(&self.device, &self.config);
        }
    }

    fn upload_image(&self, img: &RgbaImage, label: &str) -> wgpu::Texture {
        // Scale down to the GPU limit when the source exceeds it.
        let max = self.device.limits().max_texture_dimension_2d;
        let (src_w, src_h) = img.dimensions();
        let scaled;
        let img = if src_w > max || src_h > max {
            let scale = max as f32 / src_w.max(src_h) as f32;
            let (w, h) = ((src_w as f32 * scale) as u32, (src_h as f32 * scale) as u32);
            log::warn!("{}: {}x{} exceeds GPU limit {}, scaled to {}x{}", label, src_w, src_h, max, w, h);
            scaled = image::imageops::resize(img, w.max(1), h.max(1), image::imageops::FilterType::Triangle);
            &scaled
        } else {
            img
        };

        let (width, height) = img.dimensions();
        self.device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                label: Some(label),
                view_formats: &[],
            },
            img.as_raw(),
        )
    }

    fn projector_bind_group(
        &self,
        uniform: &wgpu::Buffer,
        texture: &wgpu::Texture,
        depth_view: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("projector_bind_group"),
            layout: &self.projector_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(depth_view),
                },
            ],
        })
    }

    /// Mirrors scene surfaces whose geometry or transform changed.
    fn sync_surfaces(&mut self, stage: &Stage) {
        let scene = stage.scene();
        self.surfaces.retain(|id, _| scene.surface(*id).is_some());

        for s in scene.surfaces() {
            let color = s.base_material().color;
            if let Some(gpu) = self.surfaces.get(&s.id()) {
                self.queue
                    .write_buffer(&gpu.uniform, 0, bytemuck::cast_slice(&[SurfaceUniform { color }]));
                if gpu.revision == s.revision() {
                    continue;
                }
            }

            let positions: Vec<[f32; 3]> = s.world_positions().map(|p| p.to_array()).collect();
            let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("surface_vertices"),
                contents: bytemuck::cast_slice(&positions),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("surface_indices"),
                contents: bytemuck::cast_slice(&s.mesh().indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            let uniform = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("surface_uniform"),
                contents: bytemuck::cast_slice(&[SurfaceUniform { color }]),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("surface_bind_group"),
                layout: &self.surface_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                }],
            });
            self.surfaces.insert(
                s.id(),
                GpuSurface {
                    vertex_buffer,
                    index_buffer,
                    index_count: s.mesh().indices.len() as u32,
                    revision: s.revision(),
                    uniform,
                    bind_group,
                },
            );
        }
    }

    /// Uploads each projection's uniforms and current texture frame, and
    /// binds its captured depth target.
    fn sync_projections(&mut self, stage: &Stage) {
        self.projections
            .retain(|id, _| stage.projection(*id).is_some());
        let elapsed = stage.elapsed();

        for p in stage.projections() {
            let camera = p.camera();
            let (color, view_proj, depth) = p
                .bindings()
                .next()
                .map(|b| (b.color, b.view_proj(), b.depth().cloned()))
                .unwrap_or(([0.8, 0.8, 0.8, 0.0], camera.view_projection(), None));
            // only device maps can be bound; host maps never reach the GPU
            let depth = depth.filter(|d| d.device().is_some());
            let uniform = ProjectorUniform {
                view_proj: view_proj.to_cols_array_2d(),
                color,
                lens: [
                    p.opacity(),
                    if camera.kind().is_orthographic() { 1.0 } else { 0.0 },
                    camera.near(),
                    camera.far(),
                ],
                depth: [
                    if depth.is_some() { 1.0 } else { 0.0 },
                    DEPTH_BIAS_RELATIVE,
                    DEPTH_BIAS_ABSOLUTE,
                    0.0,
                ],
            };

            let texture: Option<&Arc<Texture>> = p.texture();
            let texture_key = texture.map(|t| (Arc::as_ptr(t) as usize, t.frame_index_at(elapsed)));
            let depth_key = depth.as_ref().map(|d| Arc::as_ptr(d) as usize);

            if !self.projections.contains_key(&p.id()) {
                let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("projector_uniform"),
                    contents: bytemuck::cast_slice(&[uniform]),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                });
                let placeholder = RgbaImage::from_pixel(1, 1, image::Rgba([255, 255, 255, 255]));
                let tex = self.upload_image(&placeholder, "projector_placeholder");
                let bind_group = self.projector_bind_group(&uniform_buffer, &tex, &self.depth_placeholder);
                self.projections.insert(
                    p.id(),
                    GpuProjection {
                        uniform: uniform_buffer,
                        texture: tex,
                        texture_key: None,
                        depth_key: None,
                        bind_group,
                    },
                );
            }

            let Some(gpu) = self.projections.get(&p.id()) else {
                continue;
            };
            self.queue
                .write_buffer(&gpu.uniform, 0, bytemuck::cast_slice(&[uniform]));
            let texture_changed = texture_key.is_some() && gpu.texture_key != texture_key;
            let depth_changed = gpu.depth_key != depth_key;
            if !texture_changed && !depth_changed {
                continue;
            }

            let new_texture = match (texture_changed, texture) {
                (true, Some(t)) => Some(self.upload_image(t.frame(t.frame_index_at(elapsed)), "projector_texture")),
                _ => None,
            };

            let Some(mut gpu) = self.projections.remove(&p.id()) else {
                continue;
            };
            if let Some(t) = new_texture {
                gpu.texture = t;
                gpu.texture_key = texture_key;
            }
            gpu.depth_key = depth_key;
            let depth_view = depth
                .as_ref()
                .and_then(|d| d.device())
                .and_then(|d| d.downcast_ref::<wgpu::TextureView>())
                .unwrap_or(&self.depth_placeholder);
            gpu.bind_group = self.projector_bind_group(&gpu.uniform, &gpu.texture, depth_view);
            self.projections.insert(p.id(), gpu);
        }
    }

    fn sync_helpers(&mut self, stage: &Stage) {
        let mut vertices = Vec::new();
        for helper in stage.projections().iter().map(|p| p.helper()).filter(|h| h.visible) {
            let corners = helper.corners();
            for (a, b) in FrustumHelper::EDGES {
                for i in [a, b] {
                    vertices.push(LineVertex {
                        position: corners[i].to_array(),
                        color: helper.color,
                    });
                }
            }
        }
        self.line_buffer = (!vertices.is_empty()).then(|| {
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("helper_lines"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
            (buffer, vertices.len() as u32)
        });
    }

    pub fn render_with_ui(
        &mut self,
        window: &Window,
        stage: &Stage,
        view: &ViewCamera,
        run_ui: impl FnOnce(&egui::Context),
    ) -> Result<(), wgpu::SurfaceError> {
        self.sync_surfaces(stage);
        self.sync_projections(stage);
        self.sync_helpers(stage);
        self.queue.write_buffer(
            &self.frame_buffer,
            0,
            bytemuck::cast_slice(&[FrameUniform {
                view_proj: view.view_projection().to_cols_array_2d(),
                eye: view.position.extend(1.0).to_array(),
            }]),
        );

        let output = self.surface.get_current_texture()?;
        let target = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        // 1. Scene: base slot, then projected slots in slot order, then helpers
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.1,
                            g: 0.1,
                            b: 0.1,
                            a: 1.0,
                        }),
                        store: true,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: true,
                    }),
                    stencil_ops: None,
                }),
            });

            render_pass.set_bind_group(0, &self.frame_bind_group, &[]);
            let visible: Vec<_> = stage.scene().surfaces().iter().filter(|s| s.visible).collect();

            render_pass.set_pipeline(&self.base_pipeline);
            for s in &visible {
                let Some(gpu) = self.surfaces.get(&s.id()) else {
                    continue;
                };
                render_pass.set_bind_group(1, &gpu.bind_group, &[]);
                render_pass.set_vertex_buffer(0, gpu.vertex_buffer.slice(..));
                render_pass.set_index_buffer(gpu.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..gpu.index_count, 0, 0..1);
            }

            render_pass.set_pipeline(&self.projected_pipeline);
            for s in &visible {
                let Some(gpu) = self.surfaces.get(&s.id()) else {
                    continue;
                };
                for slot in s.slots().iter().skip(1) {
                    let MaterialSlot::Projected(pid) = slot else {
                        continue;
                    };
                    let shown = stage
                        .projection(*pid)
                        .and_then(|p| p.binding(s.id()))
                        .map_or(false, |b| b.is_visible() && b.texture().is_some());
                    let Some(proj) = self.projections.get(pid).filter(|_| shown) else {
                        continue;
                    };
                    render_pass.set_bind_group(1, &proj.bind_group, &[]);
                    render_pass.set_vertex_buffer(0, gpu.vertex_buffer.slice(..));
                    render_pass.set_index_buffer(gpu.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..gpu.index_count, 0, 0..1);
                }
            }

            if let Some((buffer, count)) = &self.line_buffer {
                render_pass.set_pipeline(&self.line_pipeline);
                render_pass.set_vertex_buffer(0, buffer.slice(..));
                render_pass.draw(0..*count, 0..1);
            }
        }

        // 2. UI
        let raw_input = self.egui_state.take_egui_input(window);
        let full_output = self.egui_ctx.run(raw_input, run_ui);

        self.egui_state
            .handle_platform_output(window, &self.egui_ctx, full_output.platform_output);
        let clipped_primitives = self.egui_ctx.tessellate(full_output.shapes);

        let screen_descriptor = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: window.scale_factor() as f32,
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        }

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
            self.egui_renderer
                .render(&mut render_pass, &clipped_primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}
