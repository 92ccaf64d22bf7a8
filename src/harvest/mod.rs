//! Harvest module - plugin discovery and the repository analysis pipeline.
//!
//! This module provides the core of the harvester:
//! - **Loader**: explicit plugin tables and discovery via [`ModuleLoader`]
//! - **Repositories**: URL sets per VCS kind via [`RepositoryRegistry`]
//! - **Results**: per-repository records via [`ResultAggregator`]
//! - **Pipeline**: staged, resumable orchestration via [`PipelineOrchestrator`]
//! - **Plugins**: the built-in parsers, cloners and analyzers

pub mod loader;
pub mod pipeline;
pub mod plugins;
pub mod repositories;
pub mod results;
pub mod traits;

// Re-export commonly used types
pub use traits::{
    capability, location, ConstructionError, DiscoveryError, PersistenceError, PipelineStage,
    RegistryError,
};

pub use loader::{
    Constructed, ConstructorSignature, Dependency, ModuleLoader, PluginArgs, PluginDescriptor,
    PluginFactory, PluginInstance, PluginRegistry, SettingsArg,
};

pub use pipeline::{
    PipelineError, PipelineOptions, PipelineOrchestrator, PipelineState, PluginCatalog, RunReport,
    SkipNotice, SkipReason,
};

pub use repositories::RepositoryRegistry;
pub use results::ResultAggregator;
