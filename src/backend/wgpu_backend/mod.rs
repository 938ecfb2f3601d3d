//! wgpu backend implementation

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::bitmap::BitmapData;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

const FILL_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.uv = in.uv;
    out.color = in.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

const BLIT_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.uv = in.uv;
    out.color = in.color;
    return out;
}

@group(0) @binding(0) var source_texture: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(source_texture, source_sampler, in.uv) * in.color;
}
"#;

const HIGHLIGHT_SHADER: &str = r#"
struct HighlightParams {
    tint: vec4<f32>,
    strength: f32,
}

struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) color: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.uv = in.uv;
    out.color = in.color;
    return out;
}

@group(0) @binding(0) var input_texture: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(0) @binding(2) var<uniform> params: HighlightParams;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let src = textureSample(input_texture, input_sampler, in.uv);
    let tinted = mix(src.rgb, params.tint.rgb, params.strength);
    return vec4<f32>(tinted, src.a) * in.color;
}
"#;

/// Interleaved quad vertex: NDC position, normalized uv, straight-alpha color
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CanvasVertex {
    position: [f32; 2],
    uv: [f32; 2],
    color: [f32; 4],
}

impl CanvasVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32x4];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<CanvasVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Highlight effect uniform data
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct HighlightParams {
    tint: [f32; 4],
    strength: f32,
    _padding: [f32; 3],
}

/// Buffered draw command, executed when its pass is encoded
#[derive(Clone)]
enum CanvasCommand {
    FillRect {
        rect: RectF,
        brush: BrushHandle,
    },
    BlitBitmap {
        bitmap: BitmapHandle,
        source: RectF,
        dest: RectF,
        opacity: f32,
        interpolation: BitmapInterpolation,
    },
    BlitOffscreen {
        target: OffscreenHandle,
        source: RectF,
        dest: RectF,
        opacity: f32,
        interpolation: BitmapInterpolation,
    },
    CompositeEffect {
        effect: EffectHandle,
        offset: Vec2,
        composite: CompositeMode,
        interpolation: BitmapInterpolation,
    },
}

/// Which target a pending pass draws into
#[derive(Clone, Copy)]
enum PassTarget {
    Primary,
    Offscreen(OffscreenHandle),
}

/// Recording session with buffered commands
struct PendingPass {
    target: PassTarget,
    clear: Option<Color>,
    commands: Vec<CanvasCommand>,
}

impl PendingPass {
    fn new(target: PassTarget) -> Self {
        Self {
            target,
            clear: None,
            commands: Vec::new(),
        }
    }
}

struct SolidBrush {
    color: Color,
}

struct GpuBitmap {
    // Held so the texture outlives its bind groups explicitly
    _texture: wgpu::Texture,
    bind_linear: wgpu::BindGroup,
    bind_nearest: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct OffscreenTarget {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    bind_linear: wgpu::BindGroup,
    bind_nearest: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct EffectResource {
    _params: wgpu::Buffer,
    bind_linear: wgpu::BindGroup,
    bind_nearest: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct Pipelines {
    fill: wgpu::RenderPipeline,
    blit: wgpu::RenderPipeline,
    effect_over: wgpu::RenderPipeline,
    effect_plus: wgpu::RenderPipeline,
}

/// One draw call resolved from a buffered command
struct ResolvedDraw<'a> {
    pipeline: &'a wgpu::RenderPipeline,
    bind: Option<&'a wgpu::BindGroup>,
    range: std::ops::Range<u32>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,

    blit_layout: wgpu::BindGroupLayout,
    effect_layout: wgpu::BindGroupLayout,
    sampler_linear: wgpu::Sampler,
    sampler_nearest: wgpu::Sampler,
    pipelines: Pipelines,

    // Resource storage
    brushes: HashMap<u64, SolidBrush>,
    bitmaps: HashMap<u64, GpuBitmap>,
    offscreen_targets: HashMap<u64, OffscreenTarget>,
    effects: HashMap<u64, EffectResource>,
    next_resource_id: u64,

    // Frame state
    current_texture: Option<wgpu::SurfaceTexture>,
    encoder: Option<wgpu::CommandEncoder>,
    offscreen_passes: Vec<PendingPass>,
    primary_pass: Option<PendingPass>,
    active_offscreen: Option<PendingPass>,
}

impl WgpuBackend {
    /// Synchronous initialization, wraps [`new_async`](Self::new_async)
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    /// Async initialization
    pub async fn new_async(
        window: Arc<winit::window::Window>,
        vsync: bool,
    ) -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::TargetCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                BackendError::InitializationFailed("No suitable adapter found".into())
            })?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Canvas Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let max_size = device.limits().max_texture_dimension_2d;
        let (width, height) = clamp_to_max(size.width.max(1), size.height.max(1), max_size);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        surface.configure(&device, &surface_config);

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let effect_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Effect Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let sampler_linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let sampler_nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Nearest Sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let pipelines =
            Self::create_pipelines(&device, surface_format, &blit_layout, &effect_layout);

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            blit_layout,
            effect_layout,
            sampler_linear,
            sampler_nearest,
            pipelines,
            brushes: HashMap::new(),
            bitmaps: HashMap::new(),
            offscreen_targets: HashMap::new(),
            effects: HashMap::new(),
            next_resource_id: 1,
            current_texture: None,
            encoder: None,
            offscreen_passes: Vec::new(),
            primary_pass: None,
            active_offscreen: None,
        })
    }

    fn alpha_blend() -> wgpu::BlendState {
        wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        }
    }

    fn additive_blend() -> wgpu::BlendState {
        wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        }
    }

    fn create_quad_pipeline(
        device: &wgpu::Device,
        label: &str,
        shader_source: &str,
        format: wgpu::TextureFormat,
        bind_layouts: &[&wgpu::BindGroupLayout],
        blend: wgpu::BlendState,
    ) -> wgpu::RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(shader_source.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: bind_layouts,
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[CanvasVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    }

    fn create_pipelines(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        blit_layout: &wgpu::BindGroupLayout,
        effect_layout: &wgpu::BindGroupLayout,
    ) -> Pipelines {
        Pipelines {
            fill: Self::create_quad_pipeline(
                device,
                "Fill Pipeline",
                FILL_SHADER,
                format,
                &[],
                Self::alpha_blend(),
            ),
            blit: Self::create_quad_pipeline(
                device,
                "Blit Pipeline",
                BLIT_SHADER,
                format,
                &[blit_layout],
                Self::alpha_blend(),
            ),
            effect_over: Self::create_quad_pipeline(
                device,
                "Effect Pipeline (over)",
                HIGHLIGHT_SHADER,
                format,
                &[effect_layout],
                Self::alpha_blend(),
            ),
            effect_plus: Self::create_quad_pipeline(
                device,
                "Effect Pipeline (plus)",
                HIGHLIGHT_SHADER,
                format,
                &[effect_layout],
                Self::additive_blend(),
            ),
        }
    }

    fn mint_id(&mut self) -> u64 {
        let id = self.next_resource_id;
        self.next_resource_id += 1;
        id
    }

    /// The pass currently receiving clear/fill commands
    fn active_sink(&mut self) -> Option<&mut PendingPass> {
        self.active_offscreen.as_mut().or(self.primary_pass.as_mut())
    }

    fn sampled_bind_groups(
        &self,
        label: Option<&str>,
        view: &wgpu::TextureView,
    ) -> (wgpu::BindGroup, wgpu::BindGroup) {
        let make = |sampler: &wgpu::Sampler| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label,
                layout: &self.blit_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            })
        };
        (make(&self.sampler_linear), make(&self.sampler_nearest))
    }

    /// Encode one buffered pass into the frame encoder.
    ///
    /// `frame_view` is the swapchain view, required for primary passes;
    /// offscreen passes resolve their own attachment. Commands whose
    /// resources no longer exist (stale handles from before a target
    /// recreation) are skipped.
    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pass: &PendingPass,
        frame_view: Option<&wgpu::TextureView>,
    ) -> BackendResult<()> {
        let (view, target_width, target_height, label) = match pass.target {
            PassTarget::Primary => {
                let Some(view) = frame_view else {
                    return Err(BackendError::DrawFailed("missing frame view".into()));
                };
                (
                    view,
                    self.surface_config.width as f32,
                    self.surface_config.height as f32,
                    "Canvas Pass",
                )
            }
            PassTarget::Offscreen(handle) => {
                let Some(target) = self.offscreen_targets.get(&handle.0) else {
                    return Ok(());
                };
                (
                    &target.view,
                    target.width as f32,
                    target.height as f32,
                    "Offscreen Pass",
                )
            }
        };

        let mut vertices: Vec<CanvasVertex> = Vec::new();
        let mut draws: Vec<ResolvedDraw> = Vec::new();

        for command in &pass.commands {
            let start = vertices.len() as u32;
            match command {
                CanvasCommand::FillRect { rect, brush } => {
                    let Some(brush) = self.brushes.get(&brush.0) else {
                        continue;
                    };
                    push_quad(
                        &mut vertices,
                        *rect,
                        target_width,
                        target_height,
                        FULL_UV,
                        brush.color.to_array(),
                    );
                    draws.push(ResolvedDraw {
                        pipeline: &self.pipelines.fill,
                        bind: None,
                        range: start..start + 6,
                    });
                }
                CanvasCommand::BlitBitmap {
                    bitmap,
                    source,
                    dest,
                    opacity,
                    interpolation,
                } => {
                    let Some(bitmap) = self.bitmaps.get(&bitmap.0) else {
                        continue;
                    };
                    push_quad(
                        &mut vertices,
                        *dest,
                        target_width,
                        target_height,
                        normalized_uv(*source, bitmap.width, bitmap.height),
                        [1.0, 1.0, 1.0, *opacity],
                    );
                    draws.push(ResolvedDraw {
                        pipeline: &self.pipelines.blit,
                        bind: Some(match interpolation {
                            BitmapInterpolation::Linear => &bitmap.bind_linear,
                            BitmapInterpolation::Nearest => &bitmap.bind_nearest,
                        }),
                        range: start..start + 6,
                    });
                }
                CanvasCommand::BlitOffscreen {
                    target,
                    source,
                    dest,
                    opacity,
                    interpolation,
                } => {
                    let Some(target) = self.offscreen_targets.get(&target.0) else {
                        continue;
                    };
                    push_quad(
                        &mut vertices,
                        *dest,
                        target_width,
                        target_height,
                        normalized_uv(*source, target.width, target.height),
                        [1.0, 1.0, 1.0, *opacity],
                    );
                    draws.push(ResolvedDraw {
                        pipeline: &self.pipelines.blit,
                        bind: Some(match interpolation {
                            BitmapInterpolation::Linear => &target.bind_linear,
                            BitmapInterpolation::Nearest => &target.bind_nearest,
                        }),
                        range: start..start + 6,
                    });
                }
                CanvasCommand::CompositeEffect {
                    effect,
                    offset,
                    composite,
                    interpolation,
                } => {
                    let Some(effect) = self.effects.get(&effect.0) else {
                        continue;
                    };
                    let dest =
                        RectF::new(offset.x, offset.y, effect.width as f32, effect.height as f32);
                    push_quad(
                        &mut vertices,
                        dest,
                        target_width,
                        target_height,
                        FULL_UV,
                        [1.0, 1.0, 1.0, 1.0],
                    );
                    draws.push(ResolvedDraw {
                        pipeline: match composite {
                            CompositeMode::SourceOver => &self.pipelines.effect_over,
                            CompositeMode::Plus => &self.pipelines.effect_plus,
                        },
                        bind: Some(match interpolation {
                            BitmapInterpolation::Linear => &effect.bind_linear,
                            BitmapInterpolation::Nearest => &effect.bind_nearest,
                        }),
                        range: start..start + 6,
                    });
                }
            }
        }

        let vertex_buffer = if vertices.is_empty() {
            None
        } else {
            Some(
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Canvas Vertices"),
                        contents: bytemuck::cast_slice(&vertices),
                        usage: wgpu::BufferUsages::VERTEX,
                    }),
            )
        };

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match pass.clear {
                            Some(color) => wgpu::LoadOp::Clear(wgpu::Color {
                                r: color.r as f64,
                                g: color.g as f64,
                                b: color.b as f64,
                                a: color.a as f64,
                            }),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(buffer) = &vertex_buffer {
                render_pass.set_vertex_buffer(0, buffer.slice(..));
                for draw in &draws {
                    render_pass.set_pipeline(draw.pipeline);
                    if let Some(bind) = draw.bind {
                        render_pass.set_bind_group(0, bind, &[]);
                    }
                    render_pass.draw(draw.range.clone(), 0..1);
                }
            }
        }

        Ok(())
    }
}

impl CanvasBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let max_size = self.device.limits().max_texture_dimension_2d;
            let (width, height) = clamp_to_max(width, height, max_size);
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn recreate_target(&mut self, width: u32, height: u32) -> BackendResult<()> {
        let max_size = self.device.limits().max_texture_dimension_2d;
        let (width, height) = clamp_to_max(width.max(1), height.max(1), max_size);
        self.surface_config.width = width;
        self.surface_config.height = height;
        // Unconditional reconfigure: this is the recovery path and must
        // re-establish the swapchain even at an unchanged size.
        self.surface.configure(&self.device, &self.surface_config);
        log::debug!("render target recreated at {}x{}", width, height);
        Ok(())
    }

    fn create_solid_brush(&mut self, color: Color) -> BackendResult<BrushHandle> {
        let id = self.mint_id();
        self.brushes.insert(id, SolidBrush { color });
        Ok(BrushHandle(id))
    }

    fn create_bitmap(&mut self, data: &BitmapData) -> BackendResult<BitmapHandle> {
        if data.data.len() != data.byte_len() {
            return Err(BackendError::BitmapCreationFailed(format!(
                "pixel payload is {} bytes, expected {}",
                data.data.len(),
                data.byte_len()
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&data.name),
            size: wgpu::Extent3d {
                width: data.width,
                height: data.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(data.width * 4),
                rows_per_image: Some(data.height),
            },
            wgpu::Extent3d {
                width: data.width,
                height: data.height,
                depth_or_array_layers: 1,
            },
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let (bind_linear, bind_nearest) = self.sampled_bind_groups(Some(&data.name), &view);

        let id = self.mint_id();
        self.bitmaps.insert(
            id,
            GpuBitmap {
                _texture: texture,
                bind_linear,
                bind_nearest,
                width: data.width,
                height: data.height,
            },
        );

        Ok(BitmapHandle(id))
    }

    fn create_offscreen_target(
        &mut self,
        desc: &OffscreenDescriptor,
    ) -> BackendResult<OffscreenHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::OffscreenCreationFailed(format!(
                "invalid size {}x{}",
                desc.width, desc.height
            )));
        }

        // Same pixel format as the primary target, so its bitmap can be
        // drawn back without conversion.
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.surface_config.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let (bind_linear, bind_nearest) = self.sampled_bind_groups(desc.label.as_deref(), &view);

        let id = self.mint_id();
        self.offscreen_targets.insert(
            id,
            OffscreenTarget {
                _texture: texture,
                view,
                bind_linear,
                bind_nearest,
                width: desc.width,
                height: desc.height,
            },
        );

        Ok(OffscreenHandle(id))
    }

    fn create_effect(
        &mut self,
        desc: &EffectDescriptor,
        input: OffscreenHandle,
    ) -> BackendResult<EffectHandle> {
        let Some(target) = self.offscreen_targets.get(&input.0) else {
            return Err(BackendError::EffectCreationFailed(
                "unknown offscreen input".into(),
            ));
        };

        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Highlight Params"),
                contents: bytemuck::bytes_of(&HighlightParams {
                    tint: desc.tint.to_array(),
                    strength: desc.strength.clamp(0.0, 1.0),
                    _padding: [0.0; 3],
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let make = |sampler: &wgpu::Sampler| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Highlight Effect"),
                layout: &self.effect_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&target.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params.as_entire_binding(),
                    },
                ],
            })
        };
        let bind_linear = make(&self.sampler_linear);
        let bind_nearest = make(&self.sampler_nearest);
        let (width, height) = (target.width, target.height);

        let id = self.mint_id();
        self.effects.insert(
            id,
            EffectResource {
                _params: params,
                bind_linear,
                bind_nearest,
                width,
                height,
            },
        );

        Ok(EffectHandle(id))
    }

    fn begin_draw(&mut self) -> BackendResult<()> {
        if self.current_texture.is_some() {
            return Err(BackendError::FrameInProgress);
        }

        let output = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
                BackendError::RecreateTarget
            }
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            other => BackendError::AcquireFailed(other.to_string()),
        })?;

        self.current_texture = Some(output);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );
        self.primary_pass = Some(PendingPass::new(PassTarget::Primary));
        self.offscreen_passes.clear();
        self.active_offscreen = None;

        Ok(())
    }

    fn clear(&mut self, color: Color) {
        if let Some(pass) = self.active_sink() {
            pass.clear = Some(color);
            // Commands recorded before a clear are wiped with the target.
            pass.commands.clear();
        }
    }

    fn fill_rect(&mut self, rect: RectF, brush: BrushHandle) {
        if rect.is_empty() {
            return;
        }
        if let Some(pass) = self.active_sink() {
            pass.commands.push(CanvasCommand::FillRect { rect, brush });
        }
    }

    fn draw_bitmap(
        &mut self,
        bitmap: BitmapHandle,
        source: RectF,
        dest: RectF,
        opacity: f32,
        interpolation: BitmapInterpolation,
    ) {
        if let Some(pass) = self.primary_pass.as_mut() {
            pass.commands.push(CanvasCommand::BlitBitmap {
                bitmap,
                source,
                dest,
                opacity,
                interpolation,
            });
        }
    }

    fn begin_offscreen_draw(&mut self, target: OffscreenHandle) {
        // A forgotten end_offscreen_draw closes the previous session.
        if let Some(previous) = self.active_offscreen.take() {
            log::warn!("offscreen session left open; closing it");
            self.offscreen_passes.push(previous);
        }
        self.active_offscreen = Some(PendingPass::new(PassTarget::Offscreen(target)));
    }

    fn end_offscreen_draw(&mut self) -> BackendResult<()> {
        match self.active_offscreen.take() {
            Some(pass) => {
                self.offscreen_passes.push(pass);
                Ok(())
            }
            None => Err(BackendError::DrawFailed(
                "no offscreen session active".into(),
            )),
        }
    }

    fn draw_offscreen(
        &mut self,
        target: OffscreenHandle,
        source: RectF,
        dest: RectF,
        opacity: f32,
        interpolation: BitmapInterpolation,
    ) {
        if let Some(pass) = self.primary_pass.as_mut() {
            pass.commands.push(CanvasCommand::BlitOffscreen {
                target,
                source,
                dest,
                opacity,
                interpolation,
            });
        }
    }

    fn draw_effect(
        &mut self,
        effect: EffectHandle,
        offset: Vec2,
        composite: CompositeMode,
        interpolation: BitmapInterpolation,
    ) {
        if let Some(pass) = self.primary_pass.as_mut() {
            pass.commands.push(CanvasCommand::CompositeEffect {
                effect,
                offset,
                composite,
                interpolation,
            });
        }
    }

    fn end_draw(&mut self) -> BackendResult<()> {
        let Some(texture) = self.current_texture.take() else {
            return Err(BackendError::DrawFailed(
                "end_draw without begin_draw".into(),
            ));
        };
        let Some(mut encoder) = self.encoder.take() else {
            return Err(BackendError::DrawFailed("no frame encoder".into()));
        };

        if self.active_offscreen.take().is_some() {
            self.primary_pass = None;
            self.offscreen_passes.clear();
            return Err(BackendError::DrawFailed(
                "offscreen session still open at end_draw".into(),
            ));
        }

        let frame_view = texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // Offscreen passes encode first so their bitmaps are complete
        // before the primary pass samples them.
        let offscreen_passes = std::mem::take(&mut self.offscreen_passes);
        for pass in &offscreen_passes {
            self.encode_pass(&mut encoder, pass, None)?;
        }

        if let Some(pass) = self.primary_pass.take() {
            self.encode_pass(&mut encoder, &pass, Some(&frame_view))?;
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        texture.present();

        Ok(())
    }

    fn destroy_brush(&mut self, brush: BrushHandle) {
        self.brushes.remove(&brush.0);
    }

    fn destroy_bitmap(&mut self, bitmap: BitmapHandle) {
        self.bitmaps.remove(&bitmap.0);
    }

    fn destroy_offscreen_target(&mut self, target: OffscreenHandle) {
        self.offscreen_targets.remove(&target.0);
    }

    fn destroy_effect(&mut self, effect: EffectHandle) {
        self.effects.remove(&effect.0);
    }
}

const FULL_UV: RectF = RectF::new(0.0, 0.0, 1.0, 1.0);

/// Normalize a pixel-space source rectangle against a texture's size
fn normalized_uv(source: RectF, width: u32, height: u32) -> RectF {
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    RectF::new(source.x / w, source.y / h, source.width / w, source.height / h)
}

/// Clamp dimensions to a device limit while maintaining aspect ratio
fn clamp_to_max(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width > max_size || height > max_size {
        let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
        (
            ((width as f32 * scale) as u32).max(1),
            ((height as f32 * scale) as u32).max(1),
        )
    } else {
        (width, height)
    }
}

/// Append one destination rectangle as two triangles.
///
/// `dest` is in target pixels (y down), `uv` already normalized.
fn push_quad(
    vertices: &mut Vec<CanvasVertex>,
    dest: RectF,
    target_width: f32,
    target_height: f32,
    uv: RectF,
    color: [f32; 4],
) {
    let x0 = dest.x / target_width * 2.0 - 1.0;
    let x1 = dest.right() / target_width * 2.0 - 1.0;
    let y0 = 1.0 - dest.y / target_height * 2.0;
    let y1 = 1.0 - dest.bottom() / target_height * 2.0;
    let (u0, v0, u1, v1) = (uv.x, uv.y, uv.right(), uv.bottom());

    let corner = |x, y, u, v| CanvasVertex {
        position: [x, y],
        uv: [u, v],
        color,
    };

    vertices.push(corner(x0, y0, u0, v0));
    vertices.push(corner(x1, y0, u1, v0));
    vertices.push(corner(x0, y1, u0, v1));
    vertices.push(corner(x1, y0, u1, v0));
    vertices.push(corner(x1, y1, u1, v1));
    vertices.push(corner(x0, y1, u0, v1));
}
