//! Warden - concurrent security posture collection for GitHub organizations.
//!
//! This library gathers organizations, repositories, members and CI settings
//! through a rate-limited, paginated client, streams them through a
//! collector manager, and evaluates them against an external policy engine
//! while honoring token scopes and viewer roles.
//!
//! # Features
//!
//! - `github` (default) - Enables the reqwest-backed HTTP transport and
//!   [`GitHubClient::connect`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden::{CollectorManager, CollectorOptions, GitHubClient, GitHubConfig, Namespace};
//!
//! let config = GitHubConfig { token, ..GitHubConfig::default() };
//! let client = Arc::new(GitHubClient::connect(config).await?);
//! let manager = CollectorManager::new(&Namespace::ALL, client, &CollectorOptions::default());
//!
//! let mut channels = manager.collect();
//! while let Some(data) = channels.collected.recv().await {
//!     println!("{} {}", data.namespace, data.canonical_link);
//! }
//! ```

pub mod analyze;
pub mod collect;
pub mod github;
pub mod http;
pub mod issues;
pub mod namespace;
pub mod pagination;
pub mod permissions;
pub mod platform;
pub mod progress;
pub mod retry;

pub use analyze::{
    AnalyzedData, Analyzer, PolicyEngine, PolicyStatus, QueryResult, Severity, Skipper,
    SkipperSettings,
};
pub use collect::{
    CollectedData, CollectedDataContext, CollectionMetric, CollectorManager, CollectorOptions,
    ManagerChannels, Metadata, MissingPermission, RepositoryRef,
};
pub use github::{GitHubApi, GitHubClient, GitHubConfig};
pub use issues::{IssueReport, PermissionLog, SkipLog, SkipReason};
pub use namespace::{Namespace, NamespaceError, validate_namespaces};
pub use permissions::{Role, TokenScopes, has_scope};
pub use platform::{PlatformError, Result};
pub use progress::{DEFAULT_GATE_TIMEOUT, ProgressError, ProgressWaiter, ThresholdGate};
