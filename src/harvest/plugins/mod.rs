//! Built-in plugin implementations.
//!
//! Each submodule contributes descriptors to [`register_builtin`]:
//! - `link_list` - repository URLs read from plain-text lists
//! - `cloners` - `git`/`svn`/`hg` command-line cloners
//! - `analyzers` - per-VCS checkout analyzers
//! - `ros_package` - `package.xml` manifest analysis
//! - `cpp` - `cpplint` error counting

pub mod analyzers;
pub mod cloners;
pub mod cpp;
pub mod link_list;
pub mod ros_package;

use crate::harvest::pipeline::PluginCatalog;
use crate::harvest::traits::DiscoveryError;

/// Registers every built-in plugin in `catalog`.
pub fn register_builtin(catalog: &mut PluginCatalog) -> Result<(), DiscoveryError> {
    catalog.parsers.register(link_list::descriptor())?;
    for descriptor in cloners::descriptors() {
        catalog.cloners.register(descriptor)?;
    }
    for descriptor in analyzers::descriptors() {
        catalog.analyzers.register(descriptor)?;
    }
    catalog.package_analyzers.register(ros_package::descriptor())?;
    catalog.file_analyzers.register(cpp::descriptor())?;
    Ok(())
}
