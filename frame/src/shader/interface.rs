//! Declared interfaces of shader stages.
//!
//! The interface is what the Pipeline Builder validates against: the vertex
//! inputs consumed, the outputs produced and the resources read. It is either
//! reflected from compiled source or declared by hand for native kernels.

use super::ShaderStage;
use crate::pipeline::BindingType;

/// Numeric class of a stage input, used to match vertex attribute formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericClass {
    Float,
    Sint,
    Uint,
}

/// One `layout(location = N) in` of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageInput {
    pub location: u32,
    pub class: NumericClass,
    pub components: u32,
}

/// One resource a stage reads, addressed by `(group, binding)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceSlot {
    pub group: u32,
    pub binding: u32,
    pub binding_type: BindingType,
}

/// The externally visible interface of one shader stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInterface {
    pub stage: ShaderStage,
    /// Vertex attributes for a vertex stage, varyings for a fragment stage.
    pub inputs: Vec<StageInput>,
    /// Varying locations for a vertex stage, color targets for a fragment
    /// stage.
    pub outputs: Vec<u32>,
    pub resources: Vec<ResourceSlot>,
    pub uses_vertex_index: bool,
    pub uses_instance_index: bool,
}

impl ShaderInterface {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            inputs: Vec::new(),
            outputs: Vec::new(),
            resources: Vec::new(),
            uses_vertex_index: false,
            uses_instance_index: false,
        }
    }

    pub fn vertex() -> Self {
        Self::new(ShaderStage::Vertex)
    }

    pub fn fragment() -> Self {
        Self::new(ShaderStage::Fragment)
    }

    /// Declares a float input with `components` components.
    pub fn with_input(self, location: u32, components: u32) -> Self {
        self.with_typed_input(location, NumericClass::Float, components)
    }

    pub fn with_typed_input(mut self, location: u32, class: NumericClass, components: u32) -> Self {
        self.inputs.push(StageInput {
            location,
            class,
            components,
        });
        self
    }

    pub fn with_output(mut self, location: u32) -> Self {
        self.outputs.push(location);
        self
    }

    pub fn with_resource(mut self, group: u32, binding: u32, binding_type: BindingType) -> Self {
        self.resources.push(ResourceSlot {
            group,
            binding,
            binding_type,
        });
        self
    }

    pub fn with_vertex_index(mut self) -> Self {
        self.uses_vertex_index = true;
        self
    }

    pub fn with_instance_index(mut self) -> Self {
        self.uses_instance_index = true;
        self
    }

    pub fn input(&self, location: u32) -> Option<&StageInput> {
        self.inputs.iter().find(|input| input.location == location)
    }

    pub fn resource(&self, group: u32, binding: u32) -> Option<&ResourceSlot> {
        self.resources
            .iter()
            .find(|slot| slot.group == group && slot.binding == binding)
    }

    /// Sorts every list so that interfaces can be compared structurally.
    pub(crate) fn normalized(mut self) -> Self {
        self.inputs.sort_by_key(|input| input.location);
        self.outputs.sort_unstable();
        self.outputs.dedup();
        self.resources.sort_by_key(|slot| (slot.group, slot.binding));
        self
    }
}
