//! GPU backend abstraction layer.
//!
//! A backend enumerates adapters and executes recorded commands. The
//! [`Queue`](crate::Queue) calls it from the GPU timeline, one command at a
//! time and in submission order.
//!
//! # Available Backends
//!
//! - `software` (default): CPU reference rasterizer, see [`software`]
//!
//! No hardware backend is compiled into this build; requesting
//! [`BackendType::Native`] fails with [`GraphicsError::Unavailable`].

pub mod software;

use std::sync::Arc;

use crate::command::Command;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, BackendType, Features, Limits};
use crate::resources::Texture;
use crate::swapchain::PresentationSurface;

/// An adapter as exposed by a backend: its identity and the features and
/// limits it can grant.
#[derive(Debug, Clone)]
pub struct AdapterDescription {
    pub info: AdapterInfo,
    pub limits: Limits,
    pub features: Features,
}

/// Trait implemented by all GPU backends.
pub(crate) trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Adapters this backend can open devices on.
    fn enumerate_adapters(&self) -> Vec<AdapterDescription>;

    /// Execute one recorded command.
    ///
    /// Resources the command touches are checked for liveness while their
    /// locks are held; a destroyed resource fails with
    /// [`GraphicsError::UsageSequence`] and leaves every destination untouched.
    fn execute(&self, command: &Command) -> Result<(), GraphicsError>;

    /// Hand layer 0 of `texture` to `surface` as an RGBA8 frame.
    fn present(&self, texture: &Texture, surface: &dyn PresentationSurface) -> Result<(), GraphicsError>;
}

/// Creates the backend selected by `backend_type`.
pub(crate) fn create_backend(backend_type: BackendType) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    match backend_type {
        BackendType::Native => Err(GraphicsError::Unavailable(
            "no native backend is compiled into this build".to_string(),
        )),
        BackendType::Software => Ok(Arc::new(software::SoftwareBackend::new())),
        BackendType::Auto => {
            log::warn!("No native backend available, falling back to the software backend");
            Ok(Arc::new(software::SoftwareBackend::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend() {
        assert_eq!(create_backend(BackendType::Software).unwrap().name(), "Software Backend");
        assert_eq!(create_backend(BackendType::Auto).unwrap().name(), "Software Backend");
        assert!(matches!(
            create_backend(BackendType::Native),
            Err(GraphicsError::Unavailable(_))
        ));
    }
}
