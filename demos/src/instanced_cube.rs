//! # Instanced Cube
//!
//! A spin on the rotating cube: one cube's vertices drawn 10 000 times by a
//! single instanced draw. The vertex stage indexes a storage buffer of
//! model-view-projection matrices with the instance index, and the whole
//! buffer is streamed again every frame.

use std::time::Duration;

use glam::{Mat4, Vec3, Vec4};
use redlilium_frame::{
    vertex_fn, BindGroupDescriptor, BindGroupLayoutDescriptor, BufferDescriptor, BufferUsage, CompareFunction,
    DepthStencilState, FragmentState, GraphicsError, PipelineLayoutDescriptor, RenderPipelineDescriptor,
    ShaderProgram, ShaderStageFlags, TextureDescriptor, TextureUsage, VertexOutput, VertexState,
};

use crate::cube::{CUBE_VERTEX_ARRAY, CUBE_VERTEX_COUNT};
use crate::rotating_cube::{
    color_fragment_program, cube_pass, cube_primitive, cube_vertex_layout, projection, DEPTH_FORMAT, FRAGMENT_SHADER,
};
use crate::{ExampleContext, FrameCallback, SURFACE_FORMAT};

pub const TITLE: &str = "Instanced Cube";
pub const DESCRIPTION: &str = "This example shows the use of instancing.";

/// Cubes along x.
pub const X_COUNT: u32 = 100;
/// Cubes along y.
pub const Y_COUNT: u32 = 100;
pub const NUM_INSTANCES: u32 = X_COUNT * Y_COUNT;
/// Distance between neighbouring cube centers.
pub const STEP: f32 = 4.0;

const VERTEX_SHADER: &str = r#"#version 450
layout(std430, set = 0, binding = 0) readonly buffer Instances {
    mat4 modelViewProjectionMatrix[];
} instances;

layout(location = 0) in vec4 position;
layout(location = 1) in vec4 color;

layout(location = 0) out vec4 fragColor;

void main() {
    gl_Position = instances.modelViewProjectionMatrix[gl_InstanceIndex] * position;
    fragColor = color;
}
"#;

/// The grid cell `(x, y)` of instance `m`.
pub fn grid_cell(m: u32) -> (u32, u32) {
    (m / Y_COUNT, m % Y_COUNT)
}

/// Model matrices of every instance, entry `m` translating to
/// [`grid_cell`]`(m)` in a grid centered on the origin.
pub fn model_matrices() -> Vec<Mat4> {
    (0..NUM_INSTANCES)
        .map(|m| {
            let (x, y) = grid_cell(m);
            Mat4::from_translation(Vec3::new(
                STEP * (x as f32 - X_COUNT as f32 / 2.0 + 0.5),
                STEP * (y as f32 - Y_COUNT as f32 / 2.0 + 0.5),
                0.0,
            ))
        })
        .collect()
}

/// Each cube spins about its own axis, which drifts with the cube's cell.
pub fn update_transformation_matrices(
    models: &[Mat4],
    view_projection: Mat4,
    elapsed: Duration,
    out: &mut [Mat4],
) {
    let now = elapsed.as_secs_f32();
    for (m, (model, mvp)) in models.iter().zip(out.iter_mut()).enumerate() {
        let (x, y) = grid_cell(m as u32);
        let axis = Vec3::new(((x as f32 + 0.5) * now).sin(), ((y as f32 + 0.5) * now).cos(), 0.0);
        let rotation = match axis.try_normalize() {
            Some(axis) => Mat4::from_axis_angle(axis, 1.0),
            None => Mat4::IDENTITY,
        };
        *mvp = view_projection * *model * rotation;
    }
}

pub fn init(ctx: &ExampleContext) -> Result<FrameCallback, GraphicsError> {
    let device = ctx.device().clone();
    let mut scheduler = ctx.create_scheduler()?;

    let vertices = device.create_buffer_init(
        &BufferDescriptor::new(0, BufferUsage::VERTEX).with_label("cube vertices"),
        bytemuck::cast_slice(&CUBE_VERTEX_ARRAY),
    )?;

    let instances_layout = device.create_bind_group_layout(
        &BindGroupLayoutDescriptor::new()
            .with_label("instances")
            .with_storage_buffer(0, ShaderStageFlags::VERTEX),
    )?;
    let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor::new(vec![instances_layout.clone()]))?;

    let vertex = ctx.compile_module(
        "instanced cube vertex",
        VERTEX_SHADER,
        ShaderProgram::vertex(vertex_fn(|invocation, input, resources| {
            let mvp: Mat4 = resources
                .element(0, 0, invocation.instance_index as usize)
                .unwrap_or(Mat4::IDENTITY);
            let position = mvp * Vec4::from_array(input.location(0));
            VertexOutput::new(position.to_array()).with_varying(0, input.location(1))
        })),
    )?;
    let fragment = ctx.compile_module("cube fragment", FRAGMENT_SHADER, color_fragment_program())?;

    let pipeline = device.create_render_pipeline(
        &RenderPipelineDescriptor::new(&layout, VertexState::new(&vertex).with_buffer(cube_vertex_layout()))
            .with_label("instanced cube")
            .with_fragment(FragmentState::new(&fragment).with_target(SURFACE_FORMAT))
            .with_primitive(cube_primitive())
            .with_depth_stencil(DepthStencilState::depth(DEPTH_FORMAT, CompareFunction::Less)),
    )?;

    let depth_texture = device.create_texture(
        &TextureDescriptor::new_2d(ctx.width(), ctx.height(), DEPTH_FORMAT, TextureUsage::RENDER_ATTACHMENT)
            .with_label("cube depth"),
    )?;
    let depth_view = depth_texture.create_view(&Default::default())?;

    let matrix_size = std::mem::size_of::<Mat4>() as u64;
    let instance_buffer = device
        .create_buffer(
            &BufferDescriptor::new(
                NUM_INSTANCES as u64 * matrix_size,
                BufferUsage::STORAGE | BufferUsage::COPY_DST,
            )
            .with_label("instance matrices"),
        )?
        .into_buffer();
    let instance_bind_group =
        device.create_bind_group(&BindGroupDescriptor::new(&instances_layout).with_buffer(0, &instance_buffer))?;

    let models = model_matrices();
    let view_projection = projection(ctx.aspect()) * Mat4::from_translation(Vec3::new(0.0, 0.0, -12.0));
    let mut mvp_matrices = vec![Mat4::IDENTITY; NUM_INSTANCES as usize];

    Ok(Box::new(move |elapsed| {
        update_transformation_matrices(&models, view_projection, elapsed, &mut mvp_matrices);

        let mut frame = scheduler.begin_frame()?;
        frame.upload(&instance_buffer, 0, bytemuck::cast_slice(&mvp_matrices))?;
        let view = frame.surface_view().clone();
        frame.render_pass(&cube_pass(&view, &depth_view).with_label("instanced cube"), |pass| {
            pass.set_pipeline(&pipeline)?;
            pass.set_vertex_buffer(0, &vertices, 0)?;
            pass.set_bind_group(0, &instance_bind_group)?;
            pass.draw(CUBE_VERTEX_COUNT, NUM_INSTANCES, 0, 0)
        })?;
        frame.submit()?;
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_maps_to_grid_cell() {
        let models = model_matrices();
        assert_eq!(models.len(), NUM_INSTANCES as usize);

        for m in [0, 1, 99, 100, 4321, NUM_INSTANCES - 1] {
            let (x, y) = grid_cell(m);
            assert_eq!((x, y), (m / 100, m % 100));
            let translation = models[m as usize].w_axis;
            assert_eq!(translation.x, STEP * (x as f32 - 49.5));
            assert_eq!(translation.y, STEP * (y as f32 - 49.5));
            assert_eq!(translation.z, 0.0);
        }
    }

    #[test]
    fn test_transforms_keep_cells_apart() {
        let models = model_matrices();
        let mut out = vec![Mat4::IDENTITY; models.len()];
        update_transformation_matrices(&models, Mat4::IDENTITY, Duration::from_millis(1500), &mut out);

        // Rotation spins each cube about its own center
        for m in [0, 5050, 9999] {
            let center = out[m] * Vec4::new(0.0, 0.0, 0.0, 1.0);
            assert!((center - models[m].w_axis).length() < 1e-4);
        }
    }
}
