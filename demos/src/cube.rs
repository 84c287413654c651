//! Vertex data of a unit cube shared by the cube examples.
//!
//! Each vertex is `float4 position, float4 color, float2 uv`. Faces wind
//! counter-clockwise when seen from outside.

/// Byte size of one vertex.
pub const CUBE_VERTEX_SIZE: u64 = 4 * 10;
/// Byte offset of the position attribute.
pub const CUBE_POSITION_OFFSET: u64 = 0;
/// Byte offset of the color attribute.
pub const CUBE_COLOR_OFFSET: u64 = 4 * 4;
/// Byte offset of the uv attribute.
pub const CUBE_UV_OFFSET: u64 = 4 * 8;
/// Vertices in [`CUBE_VERTEX_ARRAY`].
pub const CUBE_VERTEX_COUNT: u32 = 36;

#[rustfmt::skip]
pub const CUBE_VERTEX_ARRAY: [f32; 360] = [
    // float4 position, float4 color, float2 uv
    1.0, -1.0, 1.0, 1.0,    1.0, 0.0, 1.0, 1.0,  1.0, 1.0,
    -1.0, -1.0, 1.0, 1.0,   0.0, 0.0, 1.0, 1.0,  0.0, 1.0,
    -1.0, -1.0, -1.0, 1.0,  0.0, 0.0, 0.0, 1.0,  0.0, 0.0,
    1.0, -1.0, -1.0, 1.0,   1.0, 0.0, 0.0, 1.0,  1.0, 0.0,
    1.0, -1.0, 1.0, 1.0,    1.0, 0.0, 1.0, 1.0,  1.0, 1.0,
    -1.0, -1.0, -1.0, 1.0,  0.0, 0.0, 0.0, 1.0,  0.0, 0.0,

    1.0, 1.0, 1.0, 1.0,     1.0, 1.0, 1.0, 1.0,  1.0, 1.0,
    1.0, -1.0, 1.0, 1.0,    1.0, 0.0, 1.0, 1.0,  0.0, 1.0,
    1.0, -1.0, -1.0, 1.0,   1.0, 0.0, 0.0, 1.0,  0.0, 0.0,
    1.0, 1.0, -1.0, 1.0,    1.0, 1.0, 0.0, 1.0,  1.0, 0.0,
    1.0, 1.0, 1.0, 1.0,     1.0, 1.0, 1.0, 1.0,  1.0, 1.0,
    1.0, -1.0, -1.0, 1.0,   1.0, 0.0, 0.0, 1.0,  0.0, 0.0,

    -1.0, 1.0, 1.0, 1.0,    0.0, 1.0, 1.0, 1.0,  1.0, 1.0,
    1.0, 1.0, 1.0, 1.0,     1.0, 1.0, 1.0, 1.0,  0.0, 1.0,
    1.0, 1.0, -1.0, 1.0,    1.0, 1.0, 0.0, 1.0,  0.0, 0.0,
    -1.0, 1.0, -1.0, 1.0,   0.0, 1.0, 0.0, 1.0,  1.0, 0.0,
    -1.0, 1.0, 1.0, 1.0,    0.0, 1.0, 1.0, 1.0,  1.0, 1.0,
    1.0, 1.0, -1.0, 1.0,    1.0, 1.0, 0.0, 1.0,  0.0, 0.0,

    -1.0, -1.0, 1.0, 1.0,   0.0, 0.0, 1.0, 1.0,  1.0, 1.0,
    -1.0, 1.0, 1.0, 1.0,    0.0, 1.0, 1.0, 1.0,  0.0, 1.0,
    -1.0, 1.0, -1.0, 1.0,   0.0, 1.0, 0.0, 1.0,  0.0, 0.0,
    -1.0, -1.0, -1.0, 1.0,  0.0, 0.0, 0.0, 1.0,  1.0, 0.0,
    -1.0, -1.0, 1.0, 1.0,   0.0, 0.0, 1.0, 1.0,  1.0, 1.0,
    -1.0, 1.0, -1.0, 1.0,   0.0, 1.0, 0.0, 1.0,  0.0, 0.0,

    1.0, 1.0, 1.0, 1.0,     1.0, 1.0, 1.0, 1.0,  1.0, 1.0,
    -1.0, 1.0, 1.0, 1.0,    0.0, 1.0, 1.0, 1.0,  0.0, 1.0,
    -1.0, -1.0, 1.0, 1.0,   0.0, 0.0, 1.0, 1.0,  0.0, 0.0,
    -1.0, -1.0, 1.0, 1.0,   0.0, 0.0, 1.0, 1.0,  0.0, 0.0,
    1.0, -1.0, 1.0, 1.0,    1.0, 0.0, 1.0, 1.0,  1.0, 0.0,
    1.0, 1.0, 1.0, 1.0,     1.0, 1.0, 1.0, 1.0,  1.0, 1.0,

    1.0, -1.0, -1.0, 1.0,   1.0, 0.0, 0.0, 1.0,  1.0, 1.0,
    -1.0, -1.0, -1.0, 1.0,  0.0, 0.0, 0.0, 1.0,  0.0, 1.0,
    -1.0, 1.0, -1.0, 1.0,   0.0, 1.0, 0.0, 1.0,  0.0, 0.0,
    1.0, 1.0, -1.0, 1.0,    1.0, 1.0, 0.0, 1.0,  1.0, 0.0,
    1.0, -1.0, -1.0, 1.0,   1.0, 0.0, 0.0, 1.0,  1.0, 1.0,
    -1.0, 1.0, -1.0, 1.0,   0.0, 1.0, 0.0, 1.0,  0.0, 0.0,
];
