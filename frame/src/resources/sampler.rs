//! Texture sampler resource.

use crate::types::SamplerDescriptor;

/// Filtering and addressing state read by fragment kernels through
/// [`ShaderResources::sample`](crate::shader::ShaderResources::sample).
#[derive(Debug)]
pub struct Sampler {
    id: u64,
    descriptor: SamplerDescriptor,
}

impl Sampler {
    pub(crate) fn new(id: u64, descriptor: SamplerDescriptor) -> Self {
        Self { id, descriptor }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);
