//! Shader stages, modules and the compiler binding.
//!
//! # Overview
//!
//! - [`ShaderCompiler`] - The external compiler seam: source text in,
//!   [`CompiledShader`] with a reflected [`ShaderInterface`] out, or a
//!   [`CompileError`] carrying the offending line.
//! - [`GlslCompiler`] - GLSL implementation on naga's `glsl-in` frontend.
//! - [`VertexKernel`] / [`FragmentKernel`] - Native Rust entry points the
//!   software backend executes.
//! - [`ShaderModule`] - A stage interface paired with its kernel, created by
//!   [`GraphicsDevice::create_shader_module`](crate::GraphicsDevice::create_shader_module).
//!
//! # Example
//!
//! ```ignore
//! use redlilium_frame::shader::{GlslCompiler, ShaderCompiler, ShaderModuleDescriptor, ShaderProgram, ShaderStage};
//!
//! let compiled = GlslCompiler::new().compile(FRAGMENT_GLSL, ShaderStage::Fragment)?;
//! let module = device.create_shader_module(ShaderModuleDescriptor::compiled(
//!     compiled,
//!     ShaderProgram::fragment(fragment_fn(|_, _| FragmentOutput::color([1.0, 0.0, 0.0, 1.0]))),
//! ))?;
//! ```

#[cfg(feature = "glsl")]
mod glsl;
mod interface;
mod kernel;

use std::sync::Arc;

use crate::error::{CompileError, GraphicsError};

#[cfg(feature = "glsl")]
pub use glsl::GlslCompiler;
pub use interface::{NumericClass, ResourceSlot, ShaderInterface, StageInput};
pub(crate) use kernel::{BoundResource, ResourceRef};
pub use kernel::{
    fragment_fn, vertex_fn, FragmentFn, FragmentInput, FragmentKernel, FragmentOutput, InvocationContext,
    ShaderResources, VertexFn, VertexInput, VertexKernel, VertexOutput, MAX_COLOR_ATTACHMENTS, MAX_VARYINGS,
    MAX_VERTEX_ATTRIBUTES,
};

/// Shader stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Fragment shader.
    Fragment,
    /// Compute shader.
    Compute,
}

/// Converts shader source text into a compiled stage.
pub trait ShaderCompiler {
    fn compile(&self, source: &str, stage: ShaderStage) -> Result<CompiledShader, CompileError>;
}

/// Output of a [`ShaderCompiler`]: the reflected interface plus the
/// compiler's module.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    stage: ShaderStage,
    entry_point: String,
    interface: ShaderInterface,
    #[cfg(feature = "glsl")]
    module: Option<Arc<naga::Module>>,
}

impl CompiledShader {
    /// A compiled stage produced outside naga, described only by its
    /// interface.
    pub fn from_interface(entry_point: impl Into<String>, interface: ShaderInterface) -> Self {
        Self {
            stage: interface.stage,
            entry_point: entry_point.into(),
            interface: interface.normalized(),
            #[cfg(feature = "glsl")]
            module: None,
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn interface(&self) -> &ShaderInterface {
        &self.interface
    }

    /// The validated naga module, when compiled by [`GlslCompiler`].
    #[cfg(feature = "glsl")]
    pub fn naga_module(&self) -> Option<&naga::Module> {
        self.module.as_deref()
    }
}

/// The executable part of a shader module.
#[derive(Clone)]
pub enum ShaderProgram {
    Vertex(Arc<dyn VertexKernel>),
    Fragment(Arc<dyn FragmentKernel>),
}

impl ShaderProgram {
    pub fn vertex(kernel: impl VertexKernel) -> Self {
        Self::Vertex(Arc::new(kernel))
    }

    pub fn fragment(kernel: impl FragmentKernel) -> Self {
        Self::Fragment(Arc::new(kernel))
    }

    pub fn stage(&self) -> ShaderStage {
        match self {
            Self::Vertex(_) => ShaderStage::Vertex,
            Self::Fragment(_) => ShaderStage::Fragment,
        }
    }
}

impl std::fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShaderProgram::{:?}", self.stage())
    }
}

/// Where a module's interface comes from.
#[derive(Debug, Clone)]
pub enum ShaderSource {
    /// Hand-declared interface of a native kernel.
    Native(ShaderInterface),
    /// Interface reflected by a [`ShaderCompiler`].
    Compiled(CompiledShader),
}

/// Descriptor for [`GraphicsDevice::create_shader_module`](crate::GraphicsDevice::create_shader_module).
#[derive(Debug, Clone)]
pub struct ShaderModuleDescriptor {
    pub label: Option<String>,
    pub source: ShaderSource,
    pub program: ShaderProgram,
}

impl ShaderModuleDescriptor {
    pub fn native(interface: ShaderInterface, program: ShaderProgram) -> Self {
        Self {
            label: None,
            source: ShaderSource::Native(interface),
            program,
        }
    }

    pub fn compiled(compiled: CompiledShader, program: ShaderProgram) -> Self {
        Self {
            label: None,
            source: ShaderSource::Compiled(compiled),
            program,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A stage interface bound to the kernel that executes it.
#[derive(Debug)]
pub struct ShaderModule {
    id: u64,
    label: Option<String>,
    interface: ShaderInterface,
    program: ShaderProgram,
    entry_point: String,
}

impl ShaderModule {
    pub(crate) fn new(id: u64, descriptor: ShaderModuleDescriptor) -> Result<Self, GraphicsError> {
        let (interface, entry_point) = match descriptor.source {
            ShaderSource::Native(interface) => (interface.normalized(), "main".to_string()),
            ShaderSource::Compiled(compiled) => (compiled.interface, compiled.entry_point),
        };
        if interface.stage == ShaderStage::Compute {
            return Err(GraphicsError::validation(format!(
                "shader module {:?}: compute stages cannot be bound to a render pipeline",
                descriptor.label
            )));
        }
        if interface.stage != descriptor.program.stage() {
            return Err(GraphicsError::validation(format!(
                "shader module {:?}: {:?} interface paired with a {:?} kernel",
                descriptor.label,
                interface.stage,
                descriptor.program.stage()
            )));
        }
        Ok(Self {
            id,
            label: descriptor.label,
            interface,
            program: descriptor.program,
            entry_point,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn stage(&self) -> ShaderStage {
        self.interface.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn interface(&self) -> &ShaderInterface {
        &self.interface
    }

    pub(crate) fn vertex_kernel(&self) -> Option<&dyn VertexKernel> {
        match &self.program {
            ShaderProgram::Vertex(kernel) => Some(kernel.as_ref()),
            ShaderProgram::Fragment(_) => None,
        }
    }

    pub(crate) fn fragment_kernel(&self) -> Option<&dyn FragmentKernel> {
        match &self.program {
            ShaderProgram::Fragment(kernel) => Some(kernel.as_ref()),
            ShaderProgram::Vertex(_) => None,
        }
    }
}

static_assertions::assert_impl_all!(ShaderModule: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough_vertex() -> ShaderProgram {
        ShaderProgram::vertex(vertex_fn(|_, input, _| VertexOutput::new(input.location(0))))
    }

    #[test]
    fn test_native_module() {
        let desc = ShaderModuleDescriptor::native(ShaderInterface::vertex().with_input(0, 4), passthrough_vertex())
            .with_label("passthrough");
        let module = ShaderModule::new(1, desc).unwrap();
        assert_eq!(module.stage(), ShaderStage::Vertex);
        assert_eq!(module.label(), Some("passthrough"));
        assert!(module.vertex_kernel().is_some());
        assert!(module.fragment_kernel().is_none());
    }

    #[test]
    fn test_stage_mismatch_rejected() {
        let desc = ShaderModuleDescriptor::native(ShaderInterface::fragment(), passthrough_vertex());
        assert!(ShaderModule::new(1, desc).unwrap_err().is_validation());
    }

    #[test]
    fn test_compute_rejected() {
        let desc = ShaderModuleDescriptor::native(ShaderInterface::new(ShaderStage::Compute), passthrough_vertex());
        assert!(ShaderModule::new(1, desc).is_err());
    }

    #[test]
    fn test_compiled_from_interface() {
        let compiled = CompiledShader::from_interface("vs_main", ShaderInterface::vertex().with_input(0, 2));
        let module = ShaderModule::new(2, ShaderModuleDescriptor::compiled(compiled, passthrough_vertex())).unwrap();
        assert_eq!(module.entry_point(), "vs_main");
        assert_eq!(module.interface().inputs.len(), 1);
    }
}
