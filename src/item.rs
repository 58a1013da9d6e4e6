use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Serializes a [`Duration`] as fractional milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_nanos() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(Duration::from_nanos((millis.max(0.0) * 1_000_000.0) as u64))
    }
}

/// The kind of a telemetry item, without its payload.
///
/// Used by filters and metric labels where only the kind matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    Trace,
    Request,
    Dependency,
    Exception,
    Metric,
    Event,
}

impl TelemetryKind {
    /// Every kind, in declaration order.
    pub const ALL: [TelemetryKind; 6] = [
        TelemetryKind::Trace,
        TelemetryKind::Request,
        TelemetryKind::Dependency,
        TelemetryKind::Exception,
        TelemetryKind::Metric,
        TelemetryKind::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::Trace => "trace",
            TelemetryKind::Request => "request",
            TelemetryKind::Dependency => "dependency",
            TelemetryKind::Exception => "exception",
            TelemetryKind::Metric => "metric",
            TelemetryKind::Event => "event",
        }
    }

    /// Parses a kind name, ignoring case. Accepts singular and plural forms.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let singular = match name.strip_suffix("ies") {
            Some(stem) => format!("{stem}y"),
            None => name.strip_suffix('s').unwrap_or(&name).to_string(),
        };
        Self::ALL.into_iter().find(|kind| kind.as_str() == singular)
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a trace message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Verbose,
    #[default]
    Information,
    Warning,
    Error,
    Critical,
}

/// Fields shared by every telemetry item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryContext {
    /// Custom properties. Keys are unique; a later write to a key replaces the
    /// earlier value.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// When the item was created.
    pub timestamp: DateTime<Utc>,

    /// Version of the emitting component. Set by
    /// [`VersionInitializer`](crate::initializer::VersionInitializer) only
    /// while empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_version: Option<String>,

    /// Correlation id shared by a request and everything it caused.
    /// Also the sampling key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,

    /// Role name of the emitting function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_role: Option<String>,

    /// Sampling percentage in effect when the item was kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
}

impl Default for TelemetryContext {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            timestamp: Utc::now(),
            component_version: None,
            operation_id: None,
            cloud_role: None,
            sample_rate: None,
        }
    }
}

impl TelemetryContext {
    /// True when no component version has been set yet.
    pub fn component_version_is_empty(&self) -> bool {
        self.component_version.as_deref().is_none_or(str::is_empty)
    }
}

/// A log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceTelemetry {
    pub message: String,
    #[serde(default)]
    pub severity: SeverityLevel,
}

impl TraceTelemetry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: SeverityLevel::default(),
        }
    }

    pub fn with_severity(mut self, severity: SeverityLevel) -> Self {
        self.severity = severity;
        self
    }
}

/// An incoming request handled by the function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTelemetry {
    pub name: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub response_code: String,
    pub success: bool,
    pub url: String,
}

impl RequestTelemetry {
    /// Creates a request record. `success` is derived from the response code
    /// (anything below 400 succeeds) and can be overridden afterwards.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        duration: Duration,
        response_code: u16,
    ) -> Self {
        Self {
            name: name.into(),
            duration,
            response_code: response_code.to_string(),
            success: response_code < 400,
            url: url.into(),
        }
    }
}

/// An outgoing call made by the function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyTelemetry {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub success: bool,
}

impl DependencyTelemetry {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        duration: Duration,
        success: bool,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            data: String::new(),
            dependency_type: None,
            duration,
            success,
        }
    }

    /// Sets the command or URL the call carried.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Sets the dependency type, e.g. `"Azure blob"` or `"HTTP"`.
    pub fn with_type(mut self, dependency_type: impl Into<String>) -> Self {
        self.dependency_type = Some(dependency_type.into());
        self
    }
}

/// A captured error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionTelemetry {
    pub type_name: String,
    pub message: String,
    /// Messages of the error's `source()` chain, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ExceptionTelemetry {
    /// Captures an error together with its chain of sources.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            causes,
        }
    }
}

/// A single metric measurement. Dimensions go in the item's properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTelemetry {
    pub name: String,
    pub value: f64,
}

impl MetricTelemetry {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A named business event. Event data goes in the item's properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTelemetry {
    pub name: String,
}

impl EventTelemetry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The kind-specific payload of a telemetry item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryData {
    Trace(TraceTelemetry),
    Request(RequestTelemetry),
    Dependency(DependencyTelemetry),
    Exception(ExceptionTelemetry),
    Metric(MetricTelemetry),
    Event(EventTelemetry),
}

impl TelemetryData {
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetryData::Trace(_) => TelemetryKind::Trace,
            TelemetryData::Request(_) => TelemetryKind::Request,
            TelemetryData::Dependency(_) => TelemetryKind::Dependency,
            TelemetryData::Exception(_) => TelemetryKind::Exception,
            TelemetryData::Metric(_) => TelemetryKind::Metric,
            TelemetryData::Event(_) => TelemetryKind::Event,
        }
    }

    /// The item's display name: message for traces, type for exceptions,
    /// `name` for everything else.
    pub fn name(&self) -> &str {
        match self {
            TelemetryData::Trace(trace) => &trace.message,
            TelemetryData::Request(request) => &request.name,
            TelemetryData::Dependency(dependency) => &dependency.name,
            TelemetryData::Exception(exception) => &exception.type_name,
            TelemetryData::Metric(metric) => &metric.name,
            TelemetryData::Event(event) => &event.name,
        }
    }
}

macro_rules! impl_from_payload {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for TelemetryData {
                fn from(value: $ty) -> Self {
                    TelemetryData::$variant(value)
                }
            }
        )*
    };
}

impl_from_payload! {
    TraceTelemetry => Trace,
    RequestTelemetry => Request,
    DependencyTelemetry => Dependency,
    ExceptionTelemetry => Exception,
    MetricTelemetry => Metric,
    EventTelemetry => Event,
}

/// A unit of telemetry travelling through the pipeline.
///
/// # Example
///
/// ```
/// use function_telemetry::{EventTelemetry, TelemetryItem, TelemetryKind};
///
/// let mut item = TelemetryItem::new(EventTelemetry::new("BlobCreated"));
/// item.set_property("BlobName", "greeting.txt");
/// assert_eq!(item.kind(), TelemetryKind::Event);
/// assert_eq!(item.property("BlobName"), Some("greeting.txt"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryItem {
    pub context: TelemetryContext,
    #[serde(flatten)]
    pub data: TelemetryData,
}

impl TelemetryItem {
    /// Creates an item stamped with the current time and an empty context.
    pub fn new(data: impl Into<TelemetryData>) -> Self {
        Self {
            context: TelemetryContext::default(),
            data: data.into(),
        }
    }

    pub fn kind(&self) -> TelemetryKind {
        self.data.kind()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.context.properties.get(key).map(String::as_str)
    }

    /// Writes a property, replacing any previous value for `key`.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context.properties.insert(key.into(), value.into());
    }

    /// Writes several properties; later entries win on duplicate keys.
    pub fn extend_properties<I, K, V>(&mut self, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in properties {
            self.set_property(key, value);
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.context.operation_id = Some(operation_id.into());
        self
    }

    pub fn as_dependency_mut(&mut self) -> Option<&mut DependencyTelemetry> {
        match &mut self.data {
            TelemetryData::Dependency(dependency) => Some(dependency),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("upload failed")]
    struct UploadError {
        #[source]
        source: std::io::Error,
    }

    #[test]
    fn later_property_writes_overwrite() {
        let mut item = TelemetryItem::new(TraceTelemetry::new("hello"));
        item.set_property("BlobName", "a.txt");
        item.extend_properties([("BlobName", "b.txt"), ("BlobUri", "https://x/b.txt")]);

        assert_eq!(item.property("BlobName"), Some("b.txt"));
        assert_eq!(item.context.properties.len(), 2);
    }

    #[test]
    fn kind_parse_accepts_plural_and_case() {
        assert_eq!(TelemetryKind::parse("Traces"), Some(TelemetryKind::Trace));
        assert_eq!(
            TelemetryKind::parse(" dependency "),
            Some(TelemetryKind::Dependency)
        );
        assert_eq!(
            TelemetryKind::parse("dependencies"),
            Some(TelemetryKind::Dependency)
        );
        assert_eq!(TelemetryKind::parse("span"), None);
    }

    #[test]
    fn request_success_follows_response_code() {
        let ok = RequestTelemetry::new("HttpTrigger1", "/api/x", Duration::from_millis(3), 200);
        let bad = RequestTelemetry::new("HttpTrigger1", "/api/x", Duration::from_millis(3), 500);
        assert!(ok.success);
        assert_eq!(ok.response_code, "200");
        assert!(!bad.success);
    }

    #[test]
    fn exception_captures_source_chain() {
        let error = UploadError {
            source: std::io::Error::other("connection reset"),
        };
        let exception = ExceptionTelemetry::from_error(&error);

        assert_eq!(exception.message, "upload failed");
        assert_eq!(exception.causes, vec!["connection reset".to_string()]);
        assert!(exception.type_name.ends_with("UploadError"));
    }

    #[test]
    fn serializes_kind_tag_and_millis() {
        let item = TelemetryItem::new(DependencyTelemetry::new(
            "upload",
            "blob.core.windows.net",
            Duration::from_millis(12),
            true,
        ));
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["kind"], "dependency");
        assert_eq!(json["duration"], 12.0);
        assert!(json["context"].get("component_version").is_none());

        let back: TelemetryItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), TelemetryKind::Dependency);
    }

    #[test]
    fn component_version_empty_string_counts_as_unset() {
        let mut context = TelemetryContext::default();
        assert!(context.component_version_is_empty());
        context.component_version = Some(String::new());
        assert!(context.component_version_is_empty());
        context.component_version = Some("1.0".into());
        assert!(!context.component_version_is_empty());
    }
}
