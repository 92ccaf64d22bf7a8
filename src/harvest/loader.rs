//! Plugin discovery.
//!
//! Implementations register a [`PluginDescriptor`] in a typed
//! [`PluginRegistry`] (one registry per role). [`ModuleLoader::discover`]
//! then plays the part of a namespace scan: it enumerates the descriptors
//! below a location, filters them by capability and allow-list, and builds
//! the survivors through their declared constructor signature.

use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::harvest::traits::{ConstructionError, DiscoveryError};

/// Pre-built object handed positionally to plugin constructors.
pub type Dependency = Arc<dyn Any + Send + Sync>;

/// Constructor entry point of a plugin.
pub type PluginFactory<T> = fn(&PluginArgs<'_>) -> Result<Box<T>, ConstructionError>;

/// How a plugin settings argument is consumed by its constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsArg {
    /// Constructor takes no settings
    None,
    /// Constructor takes settings when they are supplied
    Optional,
    /// Constructor fails without settings
    Required,
}

/// Declared constructor shape, checked by the loader before calling the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstructorSignature {
    /// Number of leading positional dependencies consumed
    pub dependencies: usize,
    pub settings: SettingsArg,
}

impl ConstructorSignature {
    pub const fn bare() -> Self {
        Self {
            dependencies: 0,
            settings: SettingsArg::None,
        }
    }

    pub const fn with_settings() -> Self {
        Self {
            dependencies: 0,
            settings: SettingsArg::Required,
        }
    }

    pub const fn dependencies(mut self, count: usize) -> Self {
        self.dependencies = count;
        self
    }

    pub const fn settings(mut self, settings: SettingsArg) -> Self {
        self.settings = settings;
        self
    }
}

/// Arguments visible to one factory call, already trimmed to its signature.
pub struct PluginArgs<'a> {
    plugin: &'static str,
    dependencies: &'a [Dependency],
    settings: Option<&'a Arc<Settings>>,
}

impl<'a> PluginArgs<'a> {
    pub fn plugin(&self) -> &'static str {
        self.plugin
    }

    /// Positional dependency `index`, downcast to `D`.
    pub fn dependency<D: Any + Send + Sync>(
        &self,
        index: usize,
    ) -> Result<&'a D, ConstructionError> {
        self.dependencies
            .get(index)
            .and_then(|dep| dep.downcast_ref::<D>())
            .ok_or_else(|| ConstructionError::Dependency {
                plugin: self.plugin.to_string(),
                index,
                expected: std::any::type_name::<D>(),
            })
    }

    pub fn settings(&self) -> Option<&'a Arc<Settings>> {
        self.settings
    }

    /// Settings, or a construction error naming the plugin.
    pub fn require_settings(&self) -> Result<&'a Arc<Settings>, ConstructionError> {
        self.settings.ok_or_else(|| ConstructionError::Signature {
            plugin: self.plugin.to_string(),
            message: "settings are required".to_string(),
        })
    }
}

/// Metadata about one discoverable implementation.
pub struct PluginDescriptor<T: ?Sized> {
    pub name: &'static str,
    /// `/`-separated namespace the plugin lives in
    pub location: &'static str,
    pub capabilities: &'static [&'static str],
    pub signature: ConstructorSignature,
    pub factory: PluginFactory<T>,
}

impl<T: ?Sized> PluginDescriptor<T> {
    /// Capability filter: at least one required tag, no excluded tag.
    pub fn matches(&self, required: &HashSet<&str>, excluded: &HashSet<&str>) -> bool {
        let declared = || self.capabilities.iter().copied();
        declared().any(|tag| required.contains(tag))
            && !declared().any(|tag| excluded.contains(tag))
    }

    fn is_under(&self, location: &str) -> bool {
        is_under(self.location, location)
    }
}

fn is_under(candidate: &str, location: &str) -> bool {
    candidate == location
        || candidate
            .strip_prefix(location)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// A live plugin with the name it was discovered under.
pub struct PluginInstance<T: ?Sized> {
    pub name: &'static str,
    pub plugin: Box<T>,
}

impl<T: ?Sized> std::fmt::Debug for PluginInstance<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registration table for one plugin role.
pub struct PluginRegistry<T: ?Sized> {
    locations: BTreeSet<&'static str>,
    descriptors: Vec<PluginDescriptor<T>>,
}

impl<T: ?Sized> Default for PluginRegistry<T> {
    fn default() -> Self {
        Self {
            locations: BTreeSet::new(),
            descriptors: Vec::new(),
        }
    }
}

impl<T: ?Sized> PluginRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a scannable namespace root.
    pub fn with_location(mut self, location: &'static str) -> Self {
        self.locations.insert(location);
        self
    }

    /// Adds a descriptor. Names are unique per registry and the location
    /// must sit under a declared root.
    pub fn register(&mut self, descriptor: PluginDescriptor<T>) -> Result<(), DiscoveryError> {
        if !self.locations.iter().any(|root| is_under(descriptor.location, root)) {
            return Err(DiscoveryError::UnknownLocation(descriptor.location.to_string()));
        }
        if self.descriptors.iter().any(|d| d.name == descriptor.name) {
            return Err(DiscoveryError::DuplicateName {
                name: descriptor.name.to_string(),
                location: descriptor.location.to_string(),
            });
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn scan(
        &self,
        location: &str,
    ) -> Result<impl Iterator<Item = &PluginDescriptor<T>>, DiscoveryError> {
        let declared = self
            .locations
            .iter()
            .any(|root| is_under(location, root) || is_under(root, location));
        if !declared {
            return Err(DiscoveryError::UnknownLocation(location.to_string()));
        }
        let location = location.to_string();
        Ok(self.descriptors.iter().filter(move |d| d.is_under(&location)))
    }
}

/// Outcome of constructing one matching plugin.
pub type Constructed<T> = Result<PluginInstance<T>, ConstructionError>;

/// Locates and instantiates plugins registered in a [`PluginRegistry`].
pub struct ModuleLoader;

impl ModuleLoader {
    /// Discovers and builds every plugin under `location` that declares one of
    /// `required`, none of `excluded`, and (when `enabled` is non-empty) whose
    /// name is listed in `enabled`.
    ///
    /// Each factory sees the first `signature.dependencies` entries of
    /// `dependencies` and, if its signature accepts them, `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when `location` is unknown to the registry.
    /// Construction failures are returned per plugin, never swallowed.
    pub fn discover<T: ?Sized>(
        registry: &PluginRegistry<T>,
        location: &str,
        required: &[&str],
        excluded: &[&str],
        enabled: Option<&[String]>,
        dependencies: &[Dependency],
        settings: Option<&Arc<Settings>>,
    ) -> Result<Vec<Constructed<T>>, DiscoveryError> {
        let required: HashSet<&str> = required.iter().copied().collect();
        let excluded: HashSet<&str> = excluded.iter().copied().collect();
        let allow: Option<HashSet<&str>> = enabled
            .filter(|names| !names.is_empty())
            .map(|names| names.iter().map(String::as_str).collect());

        let mut matched: Vec<&PluginDescriptor<T>> = registry
            .scan(location)?
            .filter(|d| d.matches(&required, &excluded))
            .filter(|d| allow.as_ref().map_or(true, |allow| allow.contains(d.name)))
            .collect();
        matched.sort_by_key(|d| d.name);

        if let Some(allow) = &allow {
            for name in allow {
                if !matched.iter().any(|d| d.name == *name) {
                    debug!(location, plugin = name, "Enabled plugin not found");
                }
            }
        }

        let constructed = matched
            .into_iter()
            .map(|descriptor| Self::construct(descriptor, dependencies, settings))
            .collect::<Vec<_>>();

        info!(
            location,
            discovered = constructed.len(),
            "Plugin discovery completed"
        );
        Ok(constructed)
    }

    fn construct<T: ?Sized>(
        descriptor: &PluginDescriptor<T>,
        dependencies: &[Dependency],
        settings: Option<&Arc<Settings>>,
    ) -> Constructed<T> {
        let signature = descriptor.signature;
        if dependencies.len() < signature.dependencies {
            return Err(ConstructionError::Signature {
                plugin: descriptor.name.to_string(),
                message: format!(
                    "expects {} dependencies, {} supplied",
                    signature.dependencies,
                    dependencies.len()
                ),
            });
        }
        let settings = match (signature.settings, settings) {
            (SettingsArg::None, _) => None,
            (SettingsArg::Required, None) => {
                return Err(ConstructionError::Signature {
                    plugin: descriptor.name.to_string(),
                    message: "settings are required".to_string(),
                });
            }
            (_, settings) => settings,
        };

        let args = PluginArgs {
            plugin: descriptor.name,
            dependencies: &dependencies[..signature.dependencies],
            settings,
        };
        let plugin = (descriptor.factory)(&args)?;
        Ok(PluginInstance {
            name: descriptor.name,
            plugin,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
