//! # Hello Triangle
//!
//! The smallest complete frame: a pipeline without vertex buffers whose
//! vertex stage picks positions by vertex index, one render pass clearing
//! the surface to black, and one draw.

use redlilium_frame::{
    fragment_fn, vertex_fn, Color, ColorAttachment, FragmentOutput, FragmentState, GraphicsError,
    PipelineLayoutDescriptor, RenderPassDescriptor, RenderPipelineDescriptor, ShaderProgram, VertexOutput,
    VertexState,
};

use crate::{ExampleContext, FrameCallback, SURFACE_FORMAT};

pub const TITLE: &str = "Hello Triangle";
pub const DESCRIPTION: &str = "Shows rendering a basic triangle.";

pub(crate) const VERTEX_SHADER: &str = r#"#version 450
void main() {
    vec2 pos[3] = vec2[3](vec2(0.0, 0.5), vec2(-0.5, -0.5), vec2(0.5, -0.5));
    gl_Position = vec4(pos[gl_VertexIndex], 0.0, 1.0);
}
"#;

const FRAGMENT_SHADER: &str = r#"#version 450
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(1.0, 0.0, 0.0, 1.0);
}
"#;

/// Triangle corners in normalized device coordinates.
pub const POSITIONS: [[f32; 2]; 3] = [[0.0, 0.5], [-0.5, -0.5], [0.5, -0.5]];

/// Vertex kernel shared with the multisampled variant.
pub(crate) fn triangle_vertex_program() -> ShaderProgram {
    ShaderProgram::vertex(vertex_fn(|invocation, _, _| {
        let [x, y] = POSITIONS
            .get(invocation.vertex_index as usize)
            .copied()
            .unwrap_or_default();
        VertexOutput::new([x, y, 0.0, 1.0])
    }))
}

pub fn init(ctx: &ExampleContext) -> Result<FrameCallback, GraphicsError> {
    let device = ctx.device().clone();
    let mut scheduler = ctx.create_scheduler()?;

    let vertex = ctx.compile_module("hello triangle vertex", VERTEX_SHADER, triangle_vertex_program())?;
    let fragment = ctx.compile_module(
        "hello triangle fragment",
        FRAGMENT_SHADER,
        ShaderProgram::fragment(fragment_fn(|_, _| FragmentOutput::color([1.0, 0.0, 0.0, 1.0]))),
    )?;
    let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor::new(Vec::new()))?;
    let pipeline = device.create_render_pipeline(
        &RenderPipelineDescriptor::new(&layout, VertexState::new(&vertex))
            .with_label("hello triangle")
            .with_fragment(FragmentState::new(&fragment).with_target(SURFACE_FORMAT)),
    )?;

    Ok(Box::new(move |_elapsed| {
        let mut frame = scheduler.begin_frame()?;
        let view = frame.surface_view().clone();
        let descriptor = RenderPassDescriptor::new()
            .with_label("hello triangle")
            .with_color_attachment(ColorAttachment::new(&view).with_clear(Color::BLACK));
        frame.render_pass(&descriptor, |pass| {
            pass.set_pipeline(&pipeline)?;
            pass.draw(3, 1, 0, 0)
        })?;
        frame.submit()?;
        Ok(())
    }))
}
