//! Integration tests for the frame execution core.
//!
//! Every test runs against the software backend; tests sensitive to the
//! queue timeline are parameterized over [`QueueMode`] using `rstest`.
//!
//! # Test Categories
//!
//! - **Buffer Tests**: mapped commit, streaming uploads, the device error log
//! - **Pipeline Tests**: sample count matching between pipelines and passes
//! - **Render Tests**: triangle coverage, instancing order, MSAA resolve
//! - **Frame Tests**: the scheduler's acquire / record / submit sequence

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use rstest::rstest;

use common::{
    aligned_bytes_per_row, distinct_colors, extent_of, fullscreen_at, get_pixel, TestContext, FULLSCREEN_TRIANGLE,
    TRIANGLE_VERTICES,
};
use redlilium_frame::{
    create_texture_from_pixels, fragment_fn, update_buffer_data, vertex_fn, BindGroupDescriptor,
    BindGroupLayoutDescriptor, BindingType, BufferDescriptor, BufferUsage, Color, ColorAttachment, CompareFunction,
    DepthStencilAttachment, DepthStencilState, FragmentOutput, FragmentState, FrameScheduler, FrameSchedulerConfig,
    IndexFormat, InstanceParameters, InvocationContext, OffscreenSurface, Operations, PipelineLayoutDescriptor,
    PixelData, PrimitiveState, PrimitiveTopology, QueueMode, RenderPassDescriptor, RenderPipelineDescriptor,
    ScissorRect, ShaderInterface, ShaderModuleDescriptor, ShaderProgram, ShaderStageFlags, StencilFaceState,
    StencilOperation, StencilState, SurfaceConfiguration, SwapChain, TextureFormat, TextureUsage, VertexBufferLayout,
    VertexFormat, VertexOutput, VertexState,
};

// ============================================================================
// Buffer Tests
// ============================================================================

/// Bytes written into a mapped buffer are visible after commit.
#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_mapped_commit_readback(#[case] queue_mode: QueueMode) {
    let ctx = TestContext::new(queue_mode);
    let data: Vec<u8> = (0..=255).collect();

    let mut mapped = ctx
        .device
        .create_buffer(&BufferDescriptor::new(256, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC).mapped())
        .unwrap()
        .into_mapped()
        .unwrap();
    mapped.write(0, &data).unwrap();
    let buffer = mapped.commit();

    let readback = ctx.create_readback_buffer(256);
    let mut encoder = ctx.device.create_command_encoder(Some("readback"));
    encoder.copy_buffer_to_buffer(&buffer, 0, &readback, 0, 256).unwrap();
    ctx.device.queue().submit([encoder.finish()]).unwrap();

    assert_eq!(ctx.device.queue().read_buffer(&readback, 0, 256).unwrap(), data);
}

/// An update of `[D, D + N)` leaves every other byte unchanged.
#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_update_range(#[case] queue_mode: QueueMode) {
    let ctx = TestContext::new(queue_mode);
    let destination = ctx.create_buffer_init(&[0x11; 64], BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
    let source: Vec<u8> = (1..=12).collect();

    let (encoder, staging) = update_buffer_data(&ctx.device, &destination, 20, &source, None).unwrap();
    let index = ctx.device.queue().submit([encoder.finish()]).unwrap();
    staging.retire_after(ctx.device.queue(), index);

    let readback = ctx.create_readback_buffer(64);
    let mut encoder = ctx.device.create_command_encoder(None);
    encoder.copy_buffer_to_buffer(&destination, 0, &readback, 0, 64).unwrap();
    ctx.device.queue().submit([encoder.finish()]).unwrap();
    let bytes = ctx.device.queue().read_buffer(&readback, 0, 64).unwrap();

    assert_eq!(&bytes[..20], &[0x11; 20]);
    assert_eq!(&bytes[20..32], source.as_slice());
    assert_eq!(&bytes[32..], &[0x11; 32]);
}

/// Destroying a staging buffer before its copy ran shows up in the error
/// log, and the copy is skipped.
#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_staging_destroyed_early(#[case] queue_mode: QueueMode) {
    let ctx = TestContext::with_parameters(
        InstanceParameters::new()
            .with_queue_mode(queue_mode)
            .with_validation(false),
    );
    let destination = ctx.create_buffer_init(
        &[0; 8],
        BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
    );

    let (encoder, staging) = update_buffer_data(&ctx.device, &destination, 0, &[9; 8], None).unwrap();
    staging.destroy_unchecked();
    ctx.device.queue().submit([encoder.finish()]).unwrap();
    ctx.device.queue().wait_idle();

    let errors = ctx.device.queue().take_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_usage_sequence());
    assert_eq!(ctx.read_buffer(&destination), vec![0; 8]);
}

/// With validation enabled the same mistake is rejected at submit.
#[test]
fn test_staging_destroyed_early_validated() {
    let ctx = TestContext::with_parameters(InstanceParameters::new().with_validation(true));
    let destination = ctx.create_buffer_init(&[0; 8], BufferUsage::STORAGE | BufferUsage::COPY_DST);

    let (encoder, staging) = update_buffer_data(&ctx.device, &destination, 0, &[9; 8], None).unwrap();
    staging.destroy_unchecked();
    let err = ctx.device.queue().submit([encoder.finish()]).unwrap_err();
    assert!(err.is_usage_sequence());
    assert!(ctx.device.queue().take_errors().is_empty());
}

/// Texture upload pads rows to 256 bytes and readback strips the padding.
#[rstest]
#[case::narrow(5, 3)]
#[case::aligned(64, 2)]
fn test_texture_padding_round_trip(#[case] width: u32, #[case] height: u32) {
    let ctx = TestContext::new(QueueMode::Threaded);
    assert_eq!(aligned_bytes_per_row(width, 4), 256);

    let bytes: Vec<u8> = (0..width * height * 4).map(|i| (i * 7 % 251) as u8).collect();
    let pixels = PixelData::new(width, height, TextureFormat::Rgba8Unorm, bytes.clone());
    let (texture, _) = create_texture_from_pixels(&ctx.device, &pixels, TextureUsage::COPY_SRC).unwrap();

    assert_eq!(ctx.read_pixels(&texture), bytes);
}

// ============================================================================
// Pipeline Tests
// ============================================================================

/// A pipeline built for S samples is rejected by passes of another count.
#[rstest]
#[case::msaa_pipeline_single_pass(4, 1)]
#[case::single_pipeline_msaa_pass(1, 4)]
fn test_pipeline_sample_count_mismatch(#[case] pipeline_samples: u32, #[case] pass_samples: u32) {
    let ctx = TestContext::new(QueueMode::Inline);
    let pipeline = ctx.solid_color_pipeline(TextureFormat::Rgba8Unorm, pipeline_samples, [1.0; 4]);

    let resolve = ctx.create_render_target(8, 8);
    let resolve_view = resolve.create_view(&Default::default()).unwrap();
    let attachment = if pass_samples > 1 {
        let msaa = ctx.create_msaa_target(8, 8, pass_samples);
        let view = msaa.create_view(&Default::default()).unwrap();
        ColorAttachment::new(&view).with_resolve_target(&resolve_view)
    } else {
        ColorAttachment::new(&resolve_view)
    };

    let encoder = ctx.device.create_command_encoder(None);
    let mut pass = encoder
        .begin_render_pass(&RenderPassDescriptor::new().with_color_attachment(attachment))
        .unwrap();
    assert_eq!(pass.sample_count(), pass_samples);
    assert!(pass.set_pipeline(&pipeline).unwrap_err().is_validation());
    // No pipeline bound
    assert!(pass.draw(3, 1, 0, 0).unwrap_err().is_usage_sequence());
    pass.end();
}

// ============================================================================
// Render Tests
// ============================================================================

/// The triangle scenario: exactly two colors, extent matching the vertices.
#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_triangle_two_colors(#[case] queue_mode: QueueMode) {
    let ctx = TestContext::new(queue_mode);
    let surface = Arc::new(OffscreenSurface::new("triangle"));
    let swapchain = SwapChain::configure(
        &ctx.device,
        surface.clone(),
        &SurfaceConfiguration::new(64, 64).with_format(TextureFormat::Bgra8Unorm),
    )
    .unwrap();
    let mut scheduler = FrameScheduler::new(ctx.device.clone(), swapchain, FrameSchedulerConfig::default()).unwrap();

    let pipeline = ctx.solid_color_pipeline(TextureFormat::Bgra8Unorm, 1, [1.0, 0.0, 0.0, 1.0]);
    let vertices = ctx.create_vertex_buffer(&TRIANGLE_VERTICES);

    let mut frame = scheduler.begin_frame().unwrap();
    let view = frame.surface_view().clone();
    frame
        .render_pass(
            &RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(&view).with_clear(Color::BLACK)),
            |pass| {
                pass.set_pipeline(&pipeline)?;
                pass.set_vertex_buffer(0, &vertices, 0)?;
                pass.draw(3, 1, 0, 0)
            },
        )
        .unwrap();
    frame.submit().unwrap().wait();

    let presented = surface.latest_frame().unwrap();
    let colors = distinct_colors(&presented.pixels);
    assert_eq!(colors.len(), 2, "{colors:?}");
    assert!(colors.contains(&[0, 0, 0, 255]));
    assert_eq!(extent_of(&presented.pixels, 64, [255, 0, 0, 255]), Some((16, 17, 47, 47)));
}

/// Instance `m` reads entry `m` of the instance buffer.
#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_instance_indexing(#[case] queue_mode: QueueMode) {
    const INSTANCES: u32 = 8;
    let ctx = TestContext::new(queue_mode);

    // Entry m places instance m on pixel 7 - m
    let offsets: Vec<[f32; 4]> = (0..INSTANCES)
        .map(|m| {
            let x = INSTANCES - 1 - m;
            [(x as f32 + 0.5) / INSTANCES as f32 * 2.0 - 1.0, 0.0, 0.0, 0.0]
        })
        .collect();
    let instances = ctx.create_buffer_init(bytemuck::cast_slice(&offsets), BufferUsage::STORAGE);

    let group_layout = ctx
        .device
        .create_bind_group_layout(&BindGroupLayoutDescriptor::new().with_storage_buffer(0, ShaderStageFlags::VERTEX))
        .unwrap();
    let group = ctx
        .device
        .create_bind_group(&BindGroupDescriptor::new(&group_layout).with_buffer(0, &instances))
        .unwrap();
    let layout = ctx
        .device
        .create_pipeline_layout(&PipelineLayoutDescriptor::new(vec![group_layout]))
        .unwrap();

    let vertex = ctx
        .device
        .create_shader_module(ShaderModuleDescriptor::native(
            ShaderInterface::vertex()
                .with_output(0)
                .with_resource(0, 0, BindingType::StorageBuffer { read_only: true })
                .with_instance_index(),
            ShaderProgram::vertex(vertex_fn(|invocation, _, resources| {
                let instance = invocation.instance_index;
                let offset: [f32; 4] = resources.element(0, 0, instance as usize).unwrap_or_default();
                VertexOutput::new([offset[0], 0.0, 0.0, 1.0]).with_varying(0, [instance as f32 / 255.0, 0.0, 0.0, 1.0])
            })),
        ))
        .unwrap();
    let fragment = ctx
        .device
        .create_shader_module(ShaderModuleDescriptor::native(
            ShaderInterface::fragment().with_input(0, 4).with_output(0),
            ShaderProgram::fragment(fragment_fn(|input, _| FragmentOutput::color(input.varying(0)))),
        ))
        .unwrap();
    let pipeline = ctx
        .device
        .create_render_pipeline(
            &RenderPipelineDescriptor::new(&layout, VertexState::new(&vertex))
                .with_fragment(FragmentState::new(&fragment).with_target(TextureFormat::Rgba8Unorm))
                .with_primitive(PrimitiveState::default().with_topology(PrimitiveTopology::PointList)),
        )
        .unwrap();

    let target = ctx.create_render_target(INSTANCES, 1);
    let view = target.create_view(&Default::default()).unwrap();
    let encoder = ctx.device.create_command_encoder(None);
    let mut pass = encoder
        .begin_render_pass(&RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(&view)))
        .unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.set_bind_group(0, &group).unwrap();
    pass.draw(1, INSTANCES, 0, 0).unwrap();
    ctx.device.queue().submit([pass.end().finish()]).unwrap();

    let pixels = ctx.read_pixels(&target);
    for m in 0..INSTANCES {
        assert_eq!(get_pixel(&pixels, INSTANCES, INSTANCES - 1 - m, 0), [m as u8, 0, 0, 255]);
    }
}

/// Instances run in increasing order and later instances land on top.
#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_instances_rasterize_in_order(#[case] queue_mode: QueueMode) {
    const INSTANCES: u32 = 5;
    let ctx = TestContext::new(queue_mode);
    let invocations: Arc<Mutex<Vec<InvocationContext>>> = Arc::default();

    let recorded = invocations.clone();
    let vertex = ctx
        .device
        .create_shader_module(ShaderModuleDescriptor::native(
            ShaderInterface::vertex().with_input(0, 2).with_output(0).with_instance_index(),
            ShaderProgram::vertex(vertex_fn(move |invocation, input, _| {
                recorded.lock().push(invocation);
                let position = input.location(0);
                VertexOutput::new([position[0], position[1], 0.0, 1.0])
                    .with_varying(0, [0.0, invocation.instance_index as f32 / 255.0, 0.0, 1.0])
            })),
        ))
        .unwrap();
    let fragment = ctx
        .device
        .create_shader_module(ShaderModuleDescriptor::native(
            ShaderInterface::fragment().with_input(0, 4).with_output(0),
            ShaderProgram::fragment(fragment_fn(|input, _| FragmentOutput::color(input.varying(0)))),
        ))
        .unwrap();
    let layout = ctx
        .device
        .create_pipeline_layout(&PipelineLayoutDescriptor::new(Vec::new()))
        .unwrap();
    let pipeline = ctx
        .device
        .create_render_pipeline(
            &RenderPipelineDescriptor::new(
                &layout,
                VertexState::new(&vertex)
                    .with_buffer(VertexBufferLayout::new(8).with_attribute(VertexFormat::Float32x2, 0, 0)),
            )
            .with_fragment(FragmentState::new(&fragment).with_target(TextureFormat::Rgba8Unorm)),
        )
        .unwrap();

    let vertices = ctx.create_vertex_buffer(&FULLSCREEN_TRIANGLE);
    let target = ctx.create_render_target(4, 4);
    let view = target.create_view(&Default::default()).unwrap();
    let encoder = ctx.device.create_command_encoder(None);
    let mut pass = encoder
        .begin_render_pass(&RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(&view)))
        .unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.set_vertex_buffer(0, &vertices, 0).unwrap();
    pass.draw(3, INSTANCES, 0, 0).unwrap();
    ctx.device.queue().submit([pass.end().finish()]).unwrap();
    let pixels = ctx.read_pixels(&target);

    let instance_order: Vec<u32> = invocations.lock().iter().map(|i| i.instance_index).collect();
    assert_eq!(instance_order.len(), (3 * INSTANCES) as usize);
    assert!(instance_order.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(instance_order.last(), Some(&(INSTANCES - 1)));

    let last = (INSTANCES - 1) as u8;
    assert!(pixels.chunks_exact(4).all(|texel| texel == [0, last, 0, 255]));
}

/// Resolving a 4x multisampled triangle produces partially covered edge
/// pixels between the clear color and the triangle color.
#[test]
fn test_msaa_resolve_intermediate_colors() {
    let ctx = TestContext::new(QueueMode::Inline);
    let pipeline = ctx.solid_color_pipeline(TextureFormat::Rgba8Unorm, 4, [1.0, 1.0, 1.0, 1.0]);
    let vertices = ctx.create_vertex_buffer(&TRIANGLE_VERTICES);

    let msaa = ctx.create_msaa_target(32, 32, 4);
    let msaa_view = msaa.create_view(&Default::default()).unwrap();
    let resolve = ctx.create_render_target(32, 32);
    let resolve_view = resolve.create_view(&Default::default()).unwrap();

    let encoder = ctx.device.create_command_encoder(None);
    let mut pass = encoder
        .begin_render_pass(
            &RenderPassDescriptor::new().with_color_attachment(
                ColorAttachment::new(&msaa_view)
                    .with_clear(Color::BLACK)
                    .with_resolve_target(&resolve_view),
            ),
        )
        .unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.set_vertex_buffer(0, &vertices, 0).unwrap();
    pass.draw(3, 1, 0, 0).unwrap();
    ctx.device.queue().submit([pass.end().finish()]).unwrap();

    let pixels = ctx.read_pixels(&resolve);
    let colors = distinct_colors(&pixels);
    assert!(colors.contains(&[0, 0, 0, 255]));
    assert!(colors.contains(&[255, 255, 255, 255]));
    assert!(
        colors.iter().any(|c| c[0] > 0 && c[0] < 255),
        "no partially covered pixels in {colors:?}"
    );
    // Center of the triangle is fully covered
    assert_eq!(get_pixel(&pixels, 32, 16, 20), [255, 255, 255, 255]);
}

const BLACK: [u8; 4] = [0, 0, 0, 255];
const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];

/// A near green triangle drawn before a far red one decides the depth test.
#[rstest]
#[case::less(CompareFunction::Less, GREEN)]
#[case::always(CompareFunction::Always, RED)]
#[case::greater(CompareFunction::Greater, BLACK)]
fn test_depth_compare(#[case] compare: CompareFunction, #[case] expected: [u8; 4]) {
    let ctx = TestContext::new(QueueMode::Inline);
    let state = DepthStencilState::depth(TextureFormat::Depth32Float, compare);
    let near = ctx.clip_space_pipeline([0.0, 1.0, 0.0, 1.0], PrimitiveState::default(), Some(state));
    let far = ctx.clip_space_pipeline([1.0, 0.0, 0.0, 1.0], PrimitiveState::default(), Some(state));
    let near_vertices = ctx.create_buffer_init(bytemuck::cast_slice(&fullscreen_at(0.25)), BufferUsage::VERTEX);
    let far_vertices = ctx.create_buffer_init(bytemuck::cast_slice(&fullscreen_at(0.75)), BufferUsage::VERTEX);

    let target = ctx.create_render_target(4, 4);
    let view = target.create_view(&Default::default()).unwrap();
    let depth = ctx.create_depth_target(4, 4, TextureFormat::Depth32Float);
    let depth_view = depth.create_view(&Default::default()).unwrap();

    let encoder = ctx.device.create_command_encoder(None);
    let mut pass = encoder
        .begin_render_pass(
            &RenderPassDescriptor::new()
                .with_color_attachment(ColorAttachment::new(&view).with_clear(Color::BLACK))
                .with_depth_stencil_attachment(DepthStencilAttachment::new(&depth_view)),
        )
        .unwrap();
    pass.set_pipeline(&near).unwrap();
    pass.set_vertex_buffer(0, &near_vertices, 0).unwrap();
    pass.draw(3, 1, 0, 0).unwrap();
    pass.set_pipeline(&far).unwrap();
    pass.set_vertex_buffer(0, &far_vertices, 0).unwrap();
    pass.draw(3, 1, 0, 0).unwrap();
    ctx.device.queue().submit([pass.end().finish()]).unwrap();

    let pixels = ctx.read_pixels(&target);
    assert_eq!(distinct_colors(&pixels).into_iter().collect::<Vec<_>>(), vec![expected]);
}

/// A scissored draw writes the stencil reference; a later draw passes only
/// where the stencil equals it.
#[test]
fn test_stencil_masks_later_draws() {
    let ctx = TestContext::new(QueueMode::Inline);
    let format = TextureFormat::Depth24PlusStencil8;
    let ignore_depth = DepthStencilState {
        depth_write_enabled: false,
        ..DepthStencilState::depth(format, CompareFunction::Always)
    };
    let write_face = StencilFaceState {
        pass_op: StencilOperation::Replace,
        ..StencilFaceState::IGNORE
    };
    let test_face = StencilFaceState {
        compare: CompareFunction::Equal,
        ..StencilFaceState::IGNORE
    };
    let writer = ctx.clip_space_pipeline(
        [1.0, 0.0, 0.0, 1.0],
        PrimitiveState::default(),
        Some(ignore_depth.with_stencil(StencilState {
            front: write_face,
            back: write_face,
            ..StencilState::default()
        })),
    );
    let masked = ctx.clip_space_pipeline(
        [0.0, 1.0, 0.0, 1.0],
        PrimitiveState::default(),
        Some(ignore_depth.with_stencil(StencilState {
            front: test_face,
            back: test_face,
            ..StencilState::default()
        })),
    );
    let vertices = ctx.create_buffer_init(bytemuck::cast_slice(&fullscreen_at(0.5)), BufferUsage::VERTEX);

    let target = ctx.create_render_target(8, 8);
    let view = target.create_view(&Default::default()).unwrap();
    let depth = ctx.create_depth_target(8, 8, format);
    let depth_view = depth.create_view(&Default::default()).unwrap();

    let encoder = ctx.device.create_command_encoder(None);
    let mut pass = encoder
        .begin_render_pass(
            &RenderPassDescriptor::new()
                .with_color_attachment(ColorAttachment::new(&view).with_clear(Color::BLACK))
                .with_depth_stencil_attachment(
                    DepthStencilAttachment::new(&depth_view).with_stencil_ops(Operations::clear(0)),
                ),
        )
        .unwrap();
    pass.set_stencil_reference(1);
    pass.set_vertex_buffer(0, &vertices, 0).unwrap();
    pass.set_pipeline(&writer).unwrap();
    pass.set_scissor_rect(ScissorRect::new(0, 0, 4, 8)).unwrap();
    pass.draw(3, 1, 0, 0).unwrap();
    pass.set_pipeline(&masked).unwrap();
    pass.set_scissor_rect(ScissorRect::from_dimensions(8, 8)).unwrap();
    pass.draw(3, 1, 0, 0).unwrap();
    ctx.device.queue().submit([pass.end().finish()]).unwrap();

    let pixels = ctx.read_pixels(&target);
    for y in 0..8 {
        for x in 0..8 {
            let expected = if x < 4 { GREEN } else { BLACK };
            assert_eq!(get_pixel(&pixels, 8, x, y), expected, "pixel ({x}, {y})");
        }
    }
}

/// Indexed draws add `base_vertex` to every fetched index.
#[rstest]
#[case::offset_by_base(&[0, 1, 2], 3)]
#[case::direct(&[3, 4, 5], 0)]
#[case::negative_base(&[5, 6, 7], -2)]
fn test_indexed_draw_base_vertex(#[case] indices: &[u16], #[case] base_vertex: i32) {
    let ctx = TestContext::new(QueueMode::Threaded);
    let pipeline = ctx.clip_space_pipeline([1.0, 0.0, 0.0, 1.0], PrimitiveState::default(), None);

    // Vertices 0..3 are degenerate, 3..6 cover the target
    let mut vertices = vec![[0.0, 0.0, 0.0, 1.0]; 3];
    vertices.extend(fullscreen_at(0.0));
    let vertices = ctx.create_buffer_init(bytemuck::cast_slice(&vertices), BufferUsage::VERTEX);
    let index_buffer = ctx.create_buffer_init(bytemuck::cast_slice(indices), BufferUsage::INDEX);

    let target = ctx.create_render_target(4, 4);
    let view = target.create_view(&Default::default()).unwrap();
    let encoder = ctx.device.create_command_encoder(None);
    let mut pass = encoder
        .begin_render_pass(
            &RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(&view).with_clear(Color::BLACK)),
        )
        .unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.set_vertex_buffer(0, &vertices, 0).unwrap();
    pass.set_index_buffer(&index_buffer, IndexFormat::Uint16, 0).unwrap();
    pass.draw_indexed(3, 1, 0, base_vertex, 0).unwrap();
    ctx.device.queue().submit([pass.end().finish()]).unwrap();

    let pixels = ctx.read_pixels(&target);
    assert_eq!(distinct_colors(&pixels).into_iter().collect::<Vec<_>>(), vec![RED]);
    assert!(ctx.device.queue().take_errors().is_empty());
}

/// A line toward a vertex just in front of the eye is clipped to the
/// target instead of stepping across its whole projected length.
#[test]
fn test_line_to_distant_vertex() {
    let ctx = TestContext::new(QueueMode::Inline);
    let pipeline = ctx.clip_space_pipeline(
        [1.0, 0.0, 0.0, 1.0],
        PrimitiveState::default().with_topology(PrimitiveTopology::LineList),
        None,
    );
    let vertices: [[f32; 4]; 2] = [[0.0, 0.0, 0.0, 1.0], [1000.0, 0.0, 0.0, 1.5e-6]];
    let vertices = ctx.create_buffer_init(bytemuck::cast_slice(&vertices), BufferUsage::VERTEX);

    let target = ctx.create_render_target(8, 8);
    let view = target.create_view(&Default::default()).unwrap();
    let encoder = ctx.device.create_command_encoder(None);
    let mut pass = encoder
        .begin_render_pass(
            &RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(&view).with_clear(Color::BLACK)),
        )
        .unwrap();
    pass.set_pipeline(&pipeline).unwrap();
    pass.set_vertex_buffer(0, &vertices, 0).unwrap();
    pass.draw(2, 1, 0, 0).unwrap();
    ctx.device.queue().submit([pass.end().finish()]).unwrap();

    let pixels = ctx.read_pixels(&target);
    assert_eq!(extent_of(&pixels, 8, RED), Some((4, 4, 7, 4)));
}

// ============================================================================
// Frame Tests
// ============================================================================

/// Staging buffers of a frame are destroyed once its fence signaled.
#[rstest]
#[case::threaded(QueueMode::Threaded)]
#[case::inline(QueueMode::Inline)]
fn test_frame_staging_retired(#[case] queue_mode: QueueMode) {
    let ctx = TestContext::new(queue_mode);
    let surface = Arc::new(OffscreenSurface::new("frames"));
    let swapchain = SwapChain::configure(&ctx.device, surface.clone(), &SurfaceConfiguration::new(4, 4)).unwrap();
    let mut scheduler = FrameScheduler::new(ctx.device.clone(), swapchain, FrameSchedulerConfig::default()).unwrap();
    let uniforms = ctx
        .device
        .create_buffer(&BufferDescriptor::new(16, BufferUsage::UNIFORM | BufferUsage::COPY_SRC | BufferUsage::COPY_DST))
        .unwrap()
        .into_buffer();

    let buffers_before = ctx.device.buffer_count();
    let mut fences = Vec::new();
    for i in 0..4u8 {
        let mut frame = scheduler.begin_frame().unwrap();
        frame.upload(&uniforms, 0, &[i; 16]).unwrap();
        let view = frame.surface_view().clone();
        frame
            .render_pass(
                &RenderPassDescriptor::new().with_color_attachment(ColorAttachment::new(&view)),
                |_| Ok(()),
            )
            .unwrap();
        fences.push(frame.submit().unwrap());
    }
    for fence in &fences {
        fence.wait();
    }

    assert_eq!(ctx.device.buffer_count(), buffers_before);
    assert_eq!(ctx.read_buffer(&uniforms), vec![3; 16]);
    assert_eq!(surface.presented_count(), 4);
    assert!(ctx.device.queue().take_errors().is_empty());
}

/// Acquiring while the previous frame is outstanding is a usage error.
#[test]
fn test_double_acquire() {
    let ctx = TestContext::new(QueueMode::Inline);
    let surface = Arc::new(OffscreenSurface::new("double acquire"));
    let mut swapchain = SwapChain::configure(&ctx.device, surface, &SurfaceConfiguration::new(4, 4)).unwrap();

    let first = swapchain.acquire().unwrap();
    assert!(swapchain.acquire().unwrap_err().is_usage_sequence());
    ctx.device.queue().present(first).unwrap();
    assert!(swapchain.acquire().is_ok());
}
