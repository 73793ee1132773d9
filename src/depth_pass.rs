// depth_pass.rs — GPU depth capture: occluders rendered into a Depth32Float target

use projection_mapper::camera::ProjectorCamera;
use projection_mapper::depth::{DepthCapture, DepthMap};
use projection_mapper::scene::{Scene, SurfaceId};
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

pub const CAPTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CaptureUniform {
    view_proj: [[f32; 4]; 4],
}

struct Occluder {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    revision: u64,
}

/// Renders `scene.occluders()` from the projector into a fresh depth
/// texture per capture. The result stays on the GPU: the map carries the
/// texture view and the renderer binds it directly.
pub struct GpuDepthCapture {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    uniform: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    occluders: HashMap<SurfaceId, Occluder>,
    resolution: u32,
}

impl GpuDepthCapture {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, resolution: u32) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("capture_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("capture_uniform"),
            contents: bytemuck::cast_slice(&[CaptureUniform {
                view_proj: glam::Mat4::IDENTITY.to_cols_array_2d(),
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("capture_bind_group"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            }],
        });

        let shader = device.create_shader_module(wgpu::include_wgsl!("shader_depth.wgsl"));
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("capture_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("capture_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_depth",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: 12,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                }],
            },
            fragment: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: CAPTURE_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let resolution = resolution.clamp(1, device.limits().max_texture_dimension_2d);
        log::info!("gpu depth capture ready at {}x{}", resolution, resolution);

        Self {
            device,
            queue,
            pipeline,
            uniform,
            bind_group,
            occluders: HashMap::new(),
            resolution,
        }
    }

    /// Mirrors occluder geometry whose revision changed.
    fn sync_occluders(&mut self, scene: &Scene) {
        self.occluders.retain(|id, _| scene.surface(*id).is_some());
        for s in scene.occluders() {
            if self.occluders.get(&s.id()).map_or(false, |o| o.revision == s.revision()) {
                continue;
            }
            let positions: Vec<[f32; 3]> = s.world_positions().map(|p| p.to_array()).collect();
            let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("occluder_vertices"),
                contents: bytemuck::cast_slice(&positions),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("occluder_indices"),
                contents: bytemuck::cast_slice(&s.mesh().indices),
                usage: wgpu::BufferUsages::INDEX,
            });
            self.occluders.insert(
                s.id(),
                Occluder {
                    vertex_buffer,
                    index_buffer,
                    index_count: s.mesh().indices.len() as u32,
                    revision: s.revision(),
                },
            );
        }
    }
}

impl DepthCapture for GpuDepthCapture {
    fn capture(&mut self, scene: &Scene, camera: &ProjectorCamera) -> Option<DepthMap> {
        self.sync_occluders(scene);
        self.queue.write_buffer(
            &self.uniform,
            0,
            bytemuck::cast_slice(&[CaptureUniform {
                view_proj: camera.view_projection().to_cols_array_2d(),
            }]),
        );

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("projector_depth"),
            size: wgpu::Extent3d {
                width: self.resolution,
                height: self.resolution,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CAPTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("projector_depth_view"),
            aspect: wgpu::TextureAspect::DepthOnly,
            ..Default::default()
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Depth Capture Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Depth Capture Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: true,
                    }),
                    stencil_ops: None,
                }),
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            for s in scene.occluders() {
                let Some(o) = self.occluders.get(&s.id()) else {
                    continue;
                };
                pass.set_vertex_buffer(0, o.vertex_buffer.slice(..));
                pass.set_index_buffer(o.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..o.index_count, 0, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        log::debug!(
            "captured {}x{} gpu depth from {:?}",
            self.resolution,
            self.resolution,
            camera.world_position()
        );
        Some(DepthMap::from_device(self.resolution, self.resolution, Arc::new(view)))
    }
}
