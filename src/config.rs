//! Ledgerkit configuration.

/// Configuration for the reconciliation engine.
///
/// This struct contains all application-specific settings needed to
/// reconcile purchases and persist the resulting receipt.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Namespace for persisted receipt data; the default file store
    /// writes under `dirs::data_dir()/<namespace>/`.
    /// Each application should use a unique namespace to avoid collisions.
    pub storage_namespace: &'static str,

    /// Skip server-side receipt validation.
    ///
    /// Intended for sandbox and development builds: completed transactions
    /// are folded into the receipt by local synthesis instead of a
    /// validator round-trip. Never enable this in production builds.
    pub skip_validation: bool,

    /// Buffer depth for each event channel. Slow subscribers that fall
    /// more than this many events behind skip to the oldest retained one.
    pub event_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            storage_namespace: "ledgerkit",
            skip_validation: false,
            event_capacity: 64,
        }
    }
}

impl LedgerConfig {
    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), crate::LedgerError> {
        if self.storage_namespace.is_empty() {
            return Err(crate::LedgerError::ConfigError(
                "storage_namespace cannot be empty".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(crate::LedgerError::ConfigError(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
