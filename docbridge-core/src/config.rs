//! Service configuration resolved at startup.
//!
//! A [`ServiceConfig`] carries everything the layer needs that is not part of
//! an individual request: where the native store lives, the envelope wrapper
//! key, the server-side page cap, and the optional audit field names stamped
//! onto mutations.

use serde::{Deserialize, Serialize};

/// Default wrapper key for set payloads and responses.
pub const DEFAULT_WRAPPER: &str = "resource";

/// Default server-side cap on returned records per page.
pub const DEFAULT_MAX_RECORDS: u64 = 1000;

/// Resolved configuration for one record service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Connection string for the native store.
    pub dsn: String,
    /// Database name within the native store.
    pub database: String,
    /// Wrapper key under which set payloads and responses nest their records.
    pub wrapper: String,
    /// Server-side cap on page size; client limits above it are ignored.
    pub max_records: u64,
    /// Audit field stamping, when enabled.
    pub audit: Option<AuditConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            dsn: "mongodb://localhost:27017".to_string(),
            database: String::new(),
            wrapper: DEFAULT_WRAPPER.to_string(),
            max_records: DEFAULT_MAX_RECORDS,
            audit: None,
        }
    }
}

/// Names of the audit fields stamped onto records as they are written.
///
/// Any subset may be configured; absent names are simply not stamped. The
/// values come from the request context, never from ambient state, so the
/// same request replayed with the same context writes the same audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Field receiving the creation timestamp on create.
    pub created_at: Option<String>,
    /// Field receiving the mutation timestamp on create, replace, and merge.
    pub updated_at: Option<String>,
    /// Field receiving the acting user on create.
    pub created_by: Option<String>,
    /// Field receiving the acting user on create, replace, and merge.
    pub updated_by: Option<String>,
}
