//! # Hello Triangle MSAA
//!
//! The hello triangle rendered into a 4x multisampled color texture that is
//! resolved into the surface image at the end of the pass.

use redlilium_frame::{
    fragment_fn, Color, ColorAttachment, FragmentOutput, FragmentState, GraphicsError, MultisampleState,
    PipelineLayoutDescriptor, RenderPassDescriptor, RenderPipelineDescriptor, ShaderProgram, TextureDescriptor,
    TextureUsage, VertexState,
};

use crate::hello_triangle::{triangle_vertex_program, VERTEX_SHADER};
use crate::{ExampleContext, FrameCallback, SURFACE_FORMAT};

pub const TITLE: &str = "Hello Triangle MSAA";
pub const DESCRIPTION: &str = "Shows rendering a basic triangle with multisampling.";

/// Samples per pixel of the pipeline and its color attachment.
pub const SAMPLE_COUNT: u32 = 4;

const FRAGMENT_SHADER: &str = r#"#version 450
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(gl_FragCoord.xy / 800.0, 0.0, 1.0);
}
"#;

pub fn init(ctx: &ExampleContext) -> Result<FrameCallback, GraphicsError> {
    let device = ctx.device().clone();
    let mut scheduler = ctx.create_scheduler()?;

    let vertex = ctx.compile_module("msaa triangle vertex", VERTEX_SHADER, triangle_vertex_program())?;
    let fragment = ctx.compile_module(
        "msaa triangle fragment",
        FRAGMENT_SHADER,
        ShaderProgram::fragment(fragment_fn(|input, _| {
            let [x, y, _, _] = input.frag_coord;
            FragmentOutput::color([x / 800.0, y / 800.0, 0.0, 1.0])
        })),
    )?;
    let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor::new(Vec::new()))?;
    let pipeline = device.create_render_pipeline(
        &RenderPipelineDescriptor::new(&layout, VertexState::new(&vertex))
            .with_label("hello triangle msaa")
            .with_fragment(FragmentState::new(&fragment).with_target(SURFACE_FORMAT))
            .with_multisample(MultisampleState::with_count(SAMPLE_COUNT)),
    )?;

    let multisampled = device.create_texture(
        &TextureDescriptor::new_2d(ctx.width(), ctx.height(), SURFACE_FORMAT, TextureUsage::RENDER_ATTACHMENT)
            .with_label("msaa color")
            .with_sample_count(SAMPLE_COUNT),
    )?;
    let attachment = multisampled.create_view(&Default::default())?;

    Ok(Box::new(move |_elapsed| {
        let mut frame = scheduler.begin_frame()?;
        let resolve_target = frame.surface_view().clone();
        let descriptor = RenderPassDescriptor::new()
            .with_label("hello triangle msaa")
            .with_color_attachment(
                ColorAttachment::new(&attachment)
                    .with_resolve_target(&resolve_target)
                    .with_clear(Color::BLACK),
            );
        frame.render_pass(&descriptor, |pass| {
            pass.set_pipeline(&pipeline)?;
            pass.draw(3, 1, 0, 0)
        })?;
        frame.submit()?;
        Ok(())
    }))
}
