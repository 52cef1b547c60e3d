//! Listing sources and the automation session they load pages through.
//!
//! This crate provides:
//! - [`AutomationSession`]: engine lifecycle plus the retry wrapper
//! - [`SourceAdapter`]: the adapter contract, with classified-ads and
//!   government-contract implementations
//! - [`SourceTables`]: search terms, industry codes, and regions adapters read
//! - [`parse_posted`]: absolute and relative posting-time parsing

pub mod adapters;
pub mod posted;
pub mod session;
pub mod tables;

pub use adapters::{
    ClassifiedsAdapter, GovernmentContractsAdapter, SourceAdapter, default_adapters, sort_and_cap,
};
pub use posted::parse_posted;
pub use session::{
    AutomationSession, BrowserlessLoader, HttpLoader, PageLoader, is_private_target,
    retry_with_backoff,
};
pub use tables::{ClassifiedsRegion, GovernmentRegion, ServiceTerms, SourceTables};

#[cfg(test)]
mod tests {
    use super::*;
    use leadscout_shared::SourcesConfig;
    use std::sync::Arc;

    #[test]
    fn default_adapters_respect_enabled_flags() {
        let tables = Arc::new(SourceTables::default());
        let mut config = SourcesConfig::default();
        let ids: Vec<String> = default_adapters(&config, tables.clone())
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        assert_eq!(ids, vec!["classifieds", "government_contracts"]);

        config.government.enabled = false;
        assert_eq!(default_adapters(&config, tables).len(), 1);
    }
}
