use crate::core::TenantId;
use chrono::Utc;
use uuid::Uuid;

pub const DEFAULT_BUFFER_PREFIX: &str = "xp_buffer";
pub const DEFAULT_PROCESSING_PREFIX: &str = "xp_buffer_processing";

/// Key naming for live buffers and detached snapshots.
///
/// ```text
/// live:      {buffer_prefix}:{tenant}
/// snapshot:  {processing_prefix}:{tenant}:{unix_millis}:{nonce}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferKeys {
    buffer_prefix: String,
    processing_prefix: String,
}

impl BufferKeys {
    pub fn new(buffer_prefix: impl Into<String>, processing_prefix: impl Into<String>) -> Self {
        Self {
            buffer_prefix: buffer_prefix.into(),
            processing_prefix: processing_prefix.into(),
        }
    }

    pub fn live_key(&self, tenant: &TenantId) -> String {
        format!("{}:{}", self.buffer_prefix, tenant)
    }

    /// A fresh, unique snapshot key for `tenant`. Doubles as the batch id.
    pub fn processing_key(&self, tenant: &TenantId) -> String {
        format!(
            "{}:{}:{}:{}",
            self.processing_prefix,
            tenant,
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        )
    }

    pub fn live_scan_prefix(&self) -> String {
        format!("{}:", self.buffer_prefix)
    }

    pub fn processing_scan_prefix(&self) -> String {
        format!("{}:", self.processing_prefix)
    }

    pub fn tenant_of_live(&self, key: &str) -> Option<TenantId> {
        key.strip_prefix(&self.live_scan_prefix())
            .filter(|tenant| !tenant.is_empty())
            .map(TenantId::from)
    }

    pub fn tenant_of_processing(&self, key: &str) -> Option<TenantId> {
        let rest = key.strip_prefix(&self.processing_scan_prefix())?;
        let mut parts = rest.rsplitn(3, ':');
        let _nonce = parts.next()?;
        let _millis = parts.next()?.parse::<i64>().ok()?;
        parts
            .next()
            .filter(|tenant| !tenant.is_empty())
            .map(TenantId::from)
    }
}

impl Default for BufferKeys {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_PREFIX, DEFAULT_PROCESSING_PREFIX)
    }
}
