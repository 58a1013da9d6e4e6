//! Parsing of monitoring-resource connection strings.
//!
//! Format: `InstrumentationKey=<guid>;IngestionEndpoint=https://...;...`
//! Keys are case-insensitive; unknown keys are kept but ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{TelemetryError, TelemetryResult};

pub const INSTRUMENTATION_KEY: &str = "instrumentationkey";
pub const INGESTION_ENDPOINT: &str = "ingestionendpoint";
pub const LIVE_ENDPOINT: &str = "liveendpoint";

/// Endpoint used when the connection string names none.
pub const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com/";

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    instrumentation_key: Uuid,
    ingestion_endpoint: String,
    live_endpoint: Option<String>,
    extra: BTreeMap<String, String>,
}

impl ConnectionString {
    pub fn parse(value: &str) -> TelemetryResult<Self> {
        let mut pairs = BTreeMap::new();

        for segment in value.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let Some((key, val)) = segment.split_once('=') else {
                return Err(invalid(format!("segment `{segment}` is not key=value")));
            };
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(invalid(format!("segment `{segment}` has an empty key")));
            }
            pairs.insert(key, val.trim().to_string());
        }

        let key = pairs
            .remove(INSTRUMENTATION_KEY)
            .ok_or_else(|| invalid("missing InstrumentationKey".to_string()))?;
        let instrumentation_key = Uuid::parse_str(&key)
            .map_err(|e| invalid(format!("InstrumentationKey is not a GUID: {e}")))?;

        let ingestion_endpoint = pairs
            .remove(INGESTION_ENDPOINT)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_INGESTION_ENDPOINT.to_string());
        let live_endpoint = pairs.remove(LIVE_ENDPOINT).filter(|e| !e.is_empty());

        Ok(Self {
            instrumentation_key,
            ingestion_endpoint,
            live_endpoint,
            extra: pairs,
        })
    }

    pub fn instrumentation_key(&self) -> Uuid {
        self.instrumentation_key
    }

    pub fn ingestion_endpoint(&self) -> &str {
        &self.ingestion_endpoint
    }

    pub fn live_endpoint(&self) -> Option<&str> {
        self.live_endpoint.as_deref()
    }

    /// Value of a key this type does not interpret, looked up case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.extra.get(&key.to_ascii_lowercase()).map(String::as_str)
    }
}

impl FromStr for ConnectionString {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InstrumentationKey={};IngestionEndpoint={}",
            self.instrumentation_key, self.ingestion_endpoint
        )?;
        if let Some(live) = &self.live_endpoint {
            write!(f, ";LiveEndpoint={live}")?;
        }
        Ok(())
    }
}

fn invalid(reason: String) -> TelemetryError {
    TelemetryError::InvalidConnectionString { reason }
}
