//! GLSL compilation and interface reflection on naga's `glsl-in` frontend.

use std::sync::Arc;

use super::{CompiledShader, NumericClass, ResourceSlot, ShaderCompiler, ShaderInterface, ShaderStage, StageInput};
use crate::error::CompileError;
use crate::pipeline::BindingType;

/// GLSL 450 compiler.
///
/// The stage macro (`VERTEX`, `FRAGMENT` or `COMPUTE`) is always defined, so
/// a single source may hold several stages behind `#ifdef` blocks.
#[derive(Debug, Clone, Default)]
pub struct GlslCompiler {
    defines: Vec<(String, String)>,
}

impl GlslCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a preprocessor definition passed to every compilation.
    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((name.into(), value.into()));
        self
    }

    fn parse(&self, source: &str, stage: ShaderStage) -> Result<naga::Module, CompileError> {
        let naga_stage = naga_stage(stage);
        let mut defines = naga::FastHashMap::default();
        let stage_define = match stage {
            ShaderStage::Vertex => "VERTEX",
            ShaderStage::Fragment => "FRAGMENT",
            ShaderStage::Compute => "COMPUTE",
        };
        defines.insert(stage_define.to_string(), String::new());
        for (name, value) in &self.defines {
            defines.insert(name.clone(), value.clone());
        }

        let options = naga::front::glsl::Options {
            stage: naga_stage,
            defines,
        };
        let mut frontend = naga::front::glsl::Frontend::default();
        frontend.parse(&options, source).map_err(|errors| match errors.errors.first() {
            Some(first) => CompileError::new(stage, first.meta.location(source).line_number, first.kind.to_string()),
            None => CompileError::new(stage, 0, errors.to_string()),
        })
    }
}

impl ShaderCompiler for GlslCompiler {
    fn compile(&self, source: &str, stage: ShaderStage) -> Result<CompiledShader, CompileError> {
        let module = self.parse(source, stage)?;

        let mut validator =
            naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all());
        validator.validate(&module).map_err(|err| {
            let line = err.location(source).map(|location| location.line_number).unwrap_or(0);
            CompileError::new(stage, line, err.as_inner().to_string())
        })?;

        let (entry_point, interface) = reflect(&module, stage).map_err(|message| CompileError::new(stage, 0, message))?;
        log::debug!(
            "Compiled {stage:?} GLSL: {} inputs, {} outputs, {} resources",
            interface.inputs.len(),
            interface.outputs.len(),
            interface.resources.len()
        );

        Ok(CompiledShader {
            stage,
            entry_point,
            interface: interface.normalized(),
            module: Some(Arc::new(module)),
        })
    }
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

fn reflect(module: &naga::Module, stage: ShaderStage) -> Result<(String, ShaderInterface), String> {
    let wanted = naga_stage(stage);
    let entry = module
        .entry_points
        .iter()
        .find(|entry| entry.stage == wanted)
        .ok_or_else(|| format!("no {stage:?} entry point in module"))?;

    let mut interface = ShaderInterface::new(stage);
    for argument in &entry.function.arguments {
        collect_io(module, argument.ty, argument.binding.as_ref(), Direction::Input, &mut interface);
    }
    if let Some(result) = &entry.function.result {
        collect_io(module, result.ty, result.binding.as_ref(), Direction::Output, &mut interface);
    }

    for (_, variable) in module.global_variables.iter() {
        let Some(binding) = &variable.binding else {
            continue;
        };
        let binding_type = match variable.space {
            naga::AddressSpace::Uniform => BindingType::UniformBuffer,
            naga::AddressSpace::Storage { access } => BindingType::StorageBuffer {
                read_only: !access.contains(naga::StorageAccess::STORE),
            },
            naga::AddressSpace::Handle => match module.types[variable.ty].inner {
                naga::TypeInner::Image { .. } => BindingType::Texture,
                naga::TypeInner::Sampler { .. } => BindingType::Sampler,
                _ => continue,
            },
            _ => continue,
        };
        interface.resources.push(ResourceSlot {
            group: binding.group,
            binding: binding.binding,
            binding_type,
        });
    }

    Ok((entry.name.clone(), interface))
}

fn collect_io(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
    direction: Direction,
    interface: &mut ShaderInterface,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => match direction {
            Direction::Input => {
                let (class, components) = numeric_shape(&module.types[ty].inner);
                interface.inputs.push(StageInput {
                    location: *location,
                    class,
                    components,
                });
            }
            Direction::Output => interface.outputs.push(*location),
        },
        Some(naga::Binding::BuiltIn(naga::BuiltIn::VertexIndex)) => interface.uses_vertex_index = true,
        Some(naga::Binding::BuiltIn(naga::BuiltIn::InstanceIndex)) => interface.uses_instance_index = true,
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_io(module, member.ty, member.binding.as_ref(), direction, interface);
                }
            }
        }
    }
}

fn numeric_shape(inner: &naga::TypeInner) -> (NumericClass, u32) {
    let class = |kind: naga::ScalarKind| match kind {
        naga::ScalarKind::Sint => NumericClass::Sint,
        naga::ScalarKind::Uint => NumericClass::Uint,
        _ => NumericClass::Float,
    };
    match inner {
        naga::TypeInner::Scalar(scalar) => (class(scalar.kind), 1),
        naga::TypeInner::Vector { size, scalar } => (class(scalar.kind), *size as u32),
        _ => (NumericClass::Float, 4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX_SOURCE: &str = r#"#version 450
layout(set = 0, binding = 0) uniform Uniforms {
    mat4 modelViewProjectionMatrix;
} uniforms;

layout(location = 0) in vec4 position;
layout(location = 1) in vec2 uv;

layout(location = 0) out vec2 fragUV;

void main() {
    gl_Position = uniforms.modelViewProjectionMatrix * position;
    fragUV = uv;
}
"#;

    const FRAGMENT_SOURCE: &str = r#"#version 450
layout(location = 0) in vec2 fragUV;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(fragUV, 0.0, 1.0);
}
"#;

    #[test]
    fn test_reflects_vertex_interface() {
        let compiled = GlslCompiler::new().compile(VERTEX_SOURCE, ShaderStage::Vertex).unwrap();
        let interface = compiled.interface();

        assert_eq!(compiled.stage(), ShaderStage::Vertex);
        assert_eq!(compiled.entry_point(), "main");
        assert_eq!(interface.inputs.len(), 2);
        assert_eq!(interface.input(0).map(|i| i.components), Some(4));
        assert_eq!(interface.input(1).map(|i| i.components), Some(2));
        assert_eq!(interface.outputs, vec![0]);
        assert_eq!(
            interface.resource(0, 0).map(|slot| slot.binding_type),
            Some(BindingType::UniformBuffer)
        );
        assert!(compiled.naga_module().is_some());
    }

    #[test]
    fn test_reflects_fragment_outputs() {
        let compiled = GlslCompiler::new().compile(FRAGMENT_SOURCE, ShaderStage::Fragment).unwrap();
        assert_eq!(compiled.interface().outputs, vec![0]);
        assert_eq!(compiled.interface().inputs.len(), 1);
        assert!(compiled.interface().resources.is_empty());
    }

    #[test]
    fn test_reflects_builtin_indices() {
        let source = r#"#version 450
void main() {
    float x = float(gl_VertexIndex) + float(gl_InstanceIndex);
    gl_Position = vec4(x, 0.0, 0.0, 1.0);
}
"#;
        let compiled = GlslCompiler::new().compile(source, ShaderStage::Vertex).unwrap();
        assert!(compiled.interface().uses_vertex_index);
        assert!(compiled.interface().uses_instance_index);
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let source = "#version 450\nvoid main() {\n    gl_Position = vec4(0.0)\n}\n";
        let err = GlslCompiler::new().compile(source, ShaderStage::Vertex).unwrap_err();
        assert_eq!(err.stage, ShaderStage::Vertex);
        assert!(err.line >= 3, "line {} should point at or after the missing semicolon", err.line);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn test_stage_define_selects_block() {
        let source = r#"#version 450
#ifdef FRAGMENT
layout(location = 0) out vec4 outColor;
void main() { outColor = vec4(1.0); }
#else
void main() { gl_Position = vec4(0.0); }
#endif
"#;
        let fragment = GlslCompiler::new().compile(source, ShaderStage::Fragment).unwrap();
        assert_eq!(fragment.interface().outputs, vec![0]);
        let vertex = GlslCompiler::new().compile(source, ShaderStage::Vertex).unwrap();
        assert!(vertex.interface().outputs.is_empty());
    }
}
