//! Initializers stamp default and derived fields onto every item before any
//! processor sees it.
//!
//! Each initializer only adds information. The field sets of the built-in
//! initializers do not overlap, so their relative order does not matter.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use crate::instrumentation::record_processor_error;
use crate::item::TelemetryItem;

/// Property key written by [`EnvironmentInitializer`].
pub const ENVIRONMENT_PROPERTY: &str = "Environment";

/// Default threshold for [`DependencySuccessInitializer`].
pub const DEFAULT_DEPENDENCY_SUCCESS_THRESHOLD: Duration = Duration::from_millis(10);

/// Mutates an item in place before it enters the processor chain.
///
/// Initializers run on every item regardless of kind and cannot fail.
pub trait TelemetryInitializer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn initialize(&self, item: &mut TelemetryItem);
}

/// Sets the component version on items that do not carry one yet.
#[derive(Debug, Clone)]
pub struct VersionInitializer {
    version: String,
}

impl VersionInitializer {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl TelemetryInitializer for VersionInitializer {
    fn name(&self) -> &str {
        "version"
    }

    fn initialize(&self, item: &mut TelemetryItem) {
        if item.context.component_version_is_empty() {
            item.context.component_version = Some(self.version.clone());
        }
    }
}

/// Deployment environment derived from the configured tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEnvironment {
    Development,
    Test,
    /// Any other tag. Nothing is written for it.
    Other,
}

impl DeploymentEnvironment {
    /// Maps `"dev"` and `"test"`; everything else, including the empty
    /// string, is [`Other`](Self::Other). Matching is exact.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "dev" => DeploymentEnvironment::Development,
            "test" => DeploymentEnvironment::Test,
            _ => DeploymentEnvironment::Other,
        }
    }

    /// The value written to the `Environment` property, if any.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            DeploymentEnvironment::Development => Some("Development"),
            DeploymentEnvironment::Test => Some("Test"),
            DeploymentEnvironment::Other => None,
        }
    }
}

/// Writes `properties["Environment"]` for the dev and test environments.
///
/// Overwrites any value already stored under that key.
#[derive(Debug, Clone)]
pub struct EnvironmentInitializer {
    environment: DeploymentEnvironment,
}

impl EnvironmentInitializer {
    pub fn new(tag: &str) -> Self {
        Self {
            environment: DeploymentEnvironment::from_tag(tag),
        }
    }

    pub fn environment(&self) -> DeploymentEnvironment {
        self.environment
    }
}

impl TelemetryInitializer for EnvironmentInitializer {
    fn name(&self) -> &str {
        "environment"
    }

    fn initialize(&self, item: &mut TelemetryItem) {
        if let Some(label) = self.environment.label() {
            item.set_property(ENVIRONMENT_PROPERTY, label);
        }
    }
}

/// Recomputes `success` on dependency items from their duration:
/// a call succeeds when it took at most `threshold`.
#[derive(Debug, Clone)]
pub struct DependencySuccessInitializer {
    threshold: Duration,
}

impl Default for DependencySuccessInitializer {
    fn default() -> Self {
        Self::new(DEFAULT_DEPENDENCY_SUCCESS_THRESHOLD)
    }
}

impl DependencySuccessInitializer {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl TelemetryInitializer for DependencySuccessInitializer {
    fn name(&self) -> &str {
        "dependency_success"
    }

    fn initialize(&self, item: &mut TelemetryItem) {
        if let Some(dependency) = item.as_dependency_mut() {
            dependency.success = dependency.duration <= self.threshold;
        }
    }
}

/// Sets the cloud role name on items that do not carry one yet.
#[derive(Debug, Clone)]
pub struct CloudRoleInitializer {
    role: String,
}

impl CloudRoleInitializer {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

impl TelemetryInitializer for CloudRoleInitializer {
    fn name(&self) -> &str {
        "cloud_role"
    }

    fn initialize(&self, item: &mut TelemetryItem) {
        if item.context.cloud_role.as_deref().is_none_or(str::is_empty) {
            item.context.cloud_role = Some(self.role.clone());
        }
    }
}

/// Ordered, immutable list of initializers.
#[derive(Clone, Default)]
pub struct InitializerChain {
    initializers: Arc<[Arc<dyn TelemetryInitializer>]>,
}

impl InitializerChain {
    pub fn new(initializers: Vec<Arc<dyn TelemetryInitializer>>) -> Self {
        Self {
            initializers: initializers.into(),
        }
    }

    /// Runs every initializer on `item`, in registration order.
    ///
    /// An initializer that panics is logged and counted as a stage error;
    /// the item keeps whatever it wrote before panicking and continues
    /// through the rest of the chain.
    pub fn apply(&self, item: &mut TelemetryItem) {
        for initializer in self.initializers.iter() {
            if catch_unwind(AssertUnwindSafe(|| initializer.initialize(item))).is_err() {
                tracing::warn!(
                    initializer = initializer.name(),
                    kind = %item.kind(),
                    "Initializer panicked; continuing with the item"
                );
                record_processor_error(initializer.name());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.initializers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.initializers.is_empty()
    }

    /// Names of the registered initializers, in order.
    pub fn names(&self) -> Vec<&str> {
        self.initializers.iter().map(|i| i.name()).collect()
    }
}

impl std::fmt::Debug for InitializerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
