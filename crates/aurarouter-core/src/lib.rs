//! Core services for AuraRouter: the configuration store, semantic-verb role
//! resolution, the privacy auditor, and the local asset registry.
//!
//! Everything here is runtime-agnostic; the provider adapters and the
//! orchestration pipeline live in their own crates and consume these types
//! through explicit handles.

pub mod assets;
pub mod config;
pub mod privacy;
pub mod roles;

pub use assets::{AssetEntry, AssetError, AssetRegistry};
pub use config::{
    ConfigError, ConfigStore, CustomPattern, ModelEntry, PrivacySection, ProviderKind,
    SystemConfig, SystemSection,
};
pub use privacy::{AuditReport, PrivacyAuditor};
pub use roles::{RoleError, RoleResolver, SemanticVerb, BUILTIN_VERBS, REQUIRED_ROLES};
