//! Device Resolver.
//!
//! The [`GraphicsInstance`] is the top-level entry point. It selects a
//! [`GpuBackend`] and negotiates an [`Adapter`], from which a
//! [`GraphicsDevice`] with its execution [`Queue`](crate::Queue) is requested.
//! Negotiation is the only asynchronous part of the API; drive it with
//! `pollster::block_on` or any executor.
//!
//! # Example
//!
//! ```
//! use redlilium_frame::{AdapterOptions, DeviceConstraints, GraphicsInstance};
//!
//! let instance = GraphicsInstance::new().unwrap();
//! let adapter = pollster::block_on(instance.request_adapter(&AdapterOptions::default())).unwrap();
//! let device = pollster::block_on(adapter.request_device(&DeviceConstraints::default())).unwrap();
//! assert_eq!(device.limits().max_bind_groups, 4);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::backend::{self, AdapterDescription, GpuBackend};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;

/// Environment variable selecting the queue mode in [`InstanceParameters::from_env`].
pub const QUEUE_MODE_ENV: &str = "REDLILIUM_QUEUE";

/// Information about a graphics adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Adapter name.
    pub name: String,
    /// Adapter vendor.
    pub vendor: String,
    /// Device type (discrete, integrated, etc.).
    pub device_type: AdapterType,
    /// Name of the backend driving the adapter.
    pub backend: &'static str,
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Discrete GPU (dedicated graphics card).
    Discrete,
    /// Integrated GPU (shared with CPU).
    Integrated,
    /// Software renderer.
    Software,
    /// Unknown adapter type.
    Unknown,
}

/// Backend selection for [`GraphicsInstance::with_parameters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Prefer a native backend, fall back to the software backend.
    #[default]
    Auto,
    /// The CPU reference backend.
    Software,
    /// A hardware backend. None is compiled into this build.
    Native,
}

/// How the [`Queue`](crate::Queue) executes submitted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueMode {
    /// On a dedicated worker thread, the GPU timeline.
    #[default]
    Threaded,
    /// Synchronously inside `submit`, for deterministic debugging.
    Inline,
}

impl std::str::FromStr for QueueMode {
    type Err = GraphicsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threaded" => Ok(Self::Threaded),
            "inline" => Ok(Self::Inline),
            other => Err(GraphicsError::validation(format!(
                "unknown queue mode '{other}', expected 'threaded' or 'inline'"
            ))),
        }
    }
}

/// Instance configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceParameters {
    pub backend: BackendType,
    pub queue_mode: QueueMode,
    /// Check resource liveness at submit time, returning the error to the
    /// caller instead of recording it on the queue's error log.
    pub validation: bool,
}

impl Default for InstanceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            queue_mode: QueueMode::Threaded,
            validation: true,
        }
    }
}

impl InstanceParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_queue_mode(mut self, queue_mode: QueueMode) -> Self {
        self.queue_mode = queue_mode;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Defaults, with the queue mode taken from `REDLILIUM_QUEUE` when set.
    /// An unrecognized value is logged and ignored.
    pub fn from_env() -> Self {
        let mut parameters = Self::default();
        if let Ok(value) = std::env::var(QUEUE_MODE_ENV) {
            match value.parse() {
                Ok(mode) => parameters.queue_mode = mode,
                Err(e) => log::warn!("Ignoring {QUEUE_MODE_ENV}: {e}"),
            }
        }
        parameters
    }
}

/// Adapter power preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PowerPreference {
    #[default]
    None,
    LowPower,
    HighPerformance,
}

/// Options for [`GraphicsInstance::request_adapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AdapterOptions {
    pub power_preference: PowerPreference,
    /// Only accept a software adapter.
    pub force_fallback_adapter: bool,
}

impl AdapterOptions {
    pub fn with_power_preference(mut self, power_preference: PowerPreference) -> Self {
        self.power_preference = power_preference;
        self
    }

    pub fn with_fallback_adapter(mut self) -> Self {
        self.force_fallback_adapter = true;
        self
    }
}

bitflags::bitflags! {
    /// Optional device features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        /// Linear filtering of 32-bit float textures.
        const FLOAT32_FILTERABLE = 1 << 0;
        /// `PrimitiveState::unclipped_depth`.
        const DEPTH_CLIP_CONTROL = 1 << 1;
    }
}

/// Numeric device limits.
///
/// The `max_*` fields are upper bounds, the `min_*` alignment fields lower
/// bounds: a requested alignment is satisfied by an adapter whose alignment
/// is smaller or equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limits {
    pub max_texture_dimension_2d: u32,
    pub max_texture_array_layers: u32,
    pub max_bind_groups: u32,
    pub max_buffer_size: u64,
    pub max_uniform_buffer_binding_size: u64,
    pub max_storage_buffer_binding_size: u64,
    pub min_uniform_buffer_offset_alignment: u32,
    pub min_storage_buffer_offset_alignment: u32,
    pub max_vertex_buffers: u32,
    pub max_vertex_attributes: u32,
    pub max_vertex_buffer_array_stride: u32,
    pub max_color_attachments: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_texture_dimension_2d: 8192,
            max_texture_array_layers: 256,
            max_bind_groups: 4,
            max_buffer_size: 256 << 20,
            max_uniform_buffer_binding_size: 64 << 10,
            max_storage_buffer_binding_size: 128 << 20,
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            max_vertex_buffers: 8,
            max_vertex_attributes: 16,
            max_vertex_buffer_array_stride: 2048,
            max_color_attachments: 4,
        }
    }
}

impl Limits {
    /// Checks that `self` (an adapter's limits) covers `required`, naming the
    /// first limit that does not.
    pub fn satisfies(&self, required: &Limits) -> Result<(), String> {
        macro_rules! check_max {
            ($($field:ident),* $(,)?) => {$(
                if required.$field > self.$field {
                    return Err(format!(
                        "{} = {} exceeds the adapter's {}",
                        stringify!($field), required.$field, self.$field
                    ));
                }
            )*};
        }
        macro_rules! check_min {
            ($($field:ident),* $(,)?) => {$(
                if required.$field < self.$field || !required.$field.is_power_of_two() {
                    return Err(format!(
                        "{} = {} is below the adapter's {} or not a power of two",
                        stringify!($field), required.$field, self.$field
                    ));
                }
            )*};
        }
        check_max!(
            max_texture_dimension_2d,
            max_texture_array_layers,
            max_bind_groups,
            max_buffer_size,
            max_uniform_buffer_binding_size,
            max_storage_buffer_binding_size,
            max_vertex_buffers,
            max_vertex_attributes,
            max_vertex_buffer_array_stride,
            max_color_attachments,
        );
        check_min!(min_uniform_buffer_offset_alignment, min_storage_buffer_offset_alignment);
        Ok(())
    }
}

/// Requirements for [`Adapter::request_device`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceConstraints {
    pub label: Option<String>,
    pub required_features: Features,
    pub required_limits: Limits,
}

impl DeviceConstraints {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_features(mut self, features: Features) -> Self {
        self.required_features = features;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.required_limits = limits;
        self
    }
}

/// The graphics instance manages adapters and devices.
///
/// # Thread Safety
///
/// `GraphicsInstance` is `Send + Sync` and can be safely shared across threads.
pub struct GraphicsInstance {
    parameters: InstanceParameters,
    backend: Arc<dyn GpuBackend>,
    devices: RwLock<Vec<Weak<GraphicsDevice>>>,
}

impl GraphicsInstance {
    /// Create an instance with the parameters from [`InstanceParameters::from_env`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Unavailable`] if no backend can be started.
    pub fn new() -> Result<Arc<Self>, GraphicsError> {
        Self::with_parameters(InstanceParameters::from_env())
    }

    pub fn with_parameters(parameters: InstanceParameters) -> Result<Arc<Self>, GraphicsError> {
        log::info!("Creating GraphicsInstance ({parameters:?})");
        let backend = backend::create_backend(parameters.backend)?;
        log::info!("Using GPU backend: {}", backend.name());
        Ok(Arc::new(Self {
            parameters,
            backend,
            devices: RwLock::new(Vec::new()),
        }))
    }

    pub fn parameters(&self) -> &InstanceParameters {
        &self.parameters
    }

    pub(crate) fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Information about every adapter the backend exposes.
    pub fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.backend.enumerate_adapters().into_iter().map(|a| a.info).collect()
    }

    /// Picks the adapter best matching `options`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Unavailable`] if no adapter qualifies.
    pub async fn request_adapter(self: &Arc<Self>, options: &AdapterOptions) -> Result<Adapter, GraphicsError> {
        let candidates: Vec<AdapterDescription> = self
            .backend
            .enumerate_adapters()
            .into_iter()
            .filter(|a| !options.force_fallback_adapter || a.info.device_type == AdapterType::Software)
            .collect();

        let rank = |a: &AdapterDescription| match (options.power_preference, a.info.device_type) {
            (PowerPreference::HighPerformance, AdapterType::Discrete) => 0,
            (PowerPreference::LowPower, AdapterType::Integrated) => 0,
            (_, AdapterType::Software) => 2,
            _ => 1,
        };
        let description = candidates
            .into_iter()
            .min_by_key(rank)
            .ok_or_else(|| GraphicsError::Unavailable(format!("no adapter matches {options:?}")))?;

        log::info!(
            "Selected adapter: {} ({:?}, {})",
            description.info.name,
            description.info.device_type,
            description.info.backend
        );
        Ok(Adapter {
            instance: self.clone(),
            description,
        })
    }

    /// Shortcut for the default adapter and default constraints.
    pub async fn request_default_device(self: &Arc<Self>) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        let adapter = self.request_adapter(&AdapterOptions::default()).await?;
        adapter.request_device(&DeviceConstraints::default()).await
    }

    fn track(&self, device: &Arc<GraphicsDevice>) {
        let mut devices = self.devices.write();
        devices.retain(|d| d.strong_count() > 0);
        devices.push(Arc::downgrade(device));
    }

    /// Number of live devices created by this instance.
    pub fn device_count(&self) -> usize {
        self.devices.read().iter().filter(|d| d.strong_count() > 0).count()
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.backend.name())
            .field("parameters", &self.parameters)
            .field("device_count", &self.device_count())
            .finish()
    }
}

/// A physical (or software) adapter selected by [`GraphicsInstance::request_adapter`].
#[derive(Debug, Clone)]
pub struct Adapter {
    instance: Arc<GraphicsInstance>,
    description: AdapterDescription,
}

impl Adapter {
    pub fn info(&self) -> &AdapterInfo {
        &self.description.info
    }

    pub fn limits(&self) -> &Limits {
        &self.description.limits
    }

    pub fn features(&self) -> Features {
        self.description.features
    }

    /// Opens a device granting exactly the requested features and limits.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Unavailable`] if a feature or limit exceeds
    /// what the adapter supports.
    pub async fn request_device(&self, constraints: &DeviceConstraints) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        let missing = constraints.required_features - self.description.features;
        if !missing.is_empty() {
            return Err(GraphicsError::Unavailable(format!(
                "adapter {} lacks features {missing:?}",
                self.description.info.name
            )));
        }
        self.description
            .limits
            .satisfies(&constraints.required_limits)
            .map_err(|limit| GraphicsError::Unavailable(format!("adapter {}: {limit}", self.description.info.name)))?;

        log::info!(
            "Creating device {:?} on adapter: {}",
            constraints.label,
            self.description.info.name
        );
        let device = GraphicsDevice::new(
            self.instance.clone(),
            self.description.info.clone(),
            constraints,
        );
        self.instance.track(&device);
        Ok(device)
    }
}

/// The host's ability to run GPU work and to surface a notice to the user.
pub trait HostEnvironment: Send + Sync {
    fn gpu_available(&self) -> bool;

    /// Shows `message` to the user, e.g. in a dialog or status line.
    fn notify_unsupported(&self, message: &str);
}

/// A host that always reports GPU support and logs notices.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHost;

impl HostEnvironment for DefaultHost {
    fn gpu_available(&self) -> bool {
        true
    }

    fn notify_unsupported(&self, message: &str) {
        log::error!("{message}");
    }
}

/// Surfaces the "GPU unsupported" notice at most once.
#[derive(Debug, Default)]
pub struct SupportGate {
    notified: AtomicBool,
}

/// Notice shown when the host cannot run GPU work.
pub const UNSUPPORTED_NOTICE: &str = "GPU rendering is not supported in this environment.";

static GLOBAL_GATE: SupportGate = SupportGate::new();

impl SupportGate {
    pub const fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
        }
    }

    /// The process-wide gate used by [`resolve_device`].
    pub fn global() -> &'static SupportGate {
        &GLOBAL_GATE
    }

    pub fn has_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    /// Returns `Unavailable` if the host has no GPU, notifying it on the
    /// first failure only.
    pub fn check(&self, host: &dyn HostEnvironment) -> Result<(), GraphicsError> {
        if host.gpu_available() {
            return Ok(());
        }
        if !self.notified.swap(true, Ordering::AcqRel) {
            host.notify_unsupported(UNSUPPORTED_NOTICE);
        }
        Err(GraphicsError::Unavailable(UNSUPPORTED_NOTICE.to_string()))
    }

    /// Consults the gate, then negotiates instance, adapter and device.
    pub async fn resolve_device(
        &self,
        host: &dyn HostEnvironment,
        parameters: &InstanceParameters,
        constraints: &DeviceConstraints,
    ) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        self.check(host)?;
        let instance = GraphicsInstance::with_parameters(*parameters)?;
        let adapter = instance.request_adapter(&AdapterOptions::default()).await?;
        adapter.request_device(constraints).await
    }
}

/// One-call device resolution through the process-wide [`SupportGate`].
pub async fn resolve_device(
    host: &dyn HostEnvironment,
    parameters: &InstanceParameters,
    constraints: &DeviceConstraints,
) -> Result<Arc<GraphicsDevice>, GraphicsError> {
    SupportGate::global().resolve_device(host, parameters, constraints).await
}

static_assertions::assert_impl_all!(GraphicsInstance: Send, Sync);
static_assertions::assert_impl_all!(Adapter: Send, Sync);
