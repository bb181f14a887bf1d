//! Tools the agent can call, and the registry that dispatches them.
//!
//! Every tool is an explicit [`ToolDescriptor`]: name, model-facing
//! description, a parameter table and a [`ToolHandler`]. Built-in toolkits
//! expose a `descriptors` function that returns their descriptors for
//! [`ToolRegistry::register_all`].

pub mod code;
mod descriptor;
pub mod file;
pub mod json;
mod registry;
pub mod web;

use std::path::Path;
use std::sync::Arc;

pub use descriptor::{
    from_fn, ParamSpec, SchemaFormat, ToolArgs, ToolDescriptor, ToolHandler, ValueType,
    SESSION_ID_PARAM,
};
pub use registry::{RegistryError, ToolOutcome, ToolRegistry};
pub use web::HttpBrowser;

/// Every built-in tool: file, code, JSON and web explorer.
pub fn builtin_descriptors(workspace: &Path, browser: Arc<HttpBrowser>) -> Vec<ToolDescriptor> {
    let mut all = file::descriptors(workspace);
    all.extend(code::default_descriptors(workspace));
    all.extend(json::descriptors());
    all.extend(web::descriptors(browser));
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_are_unique() {
        let browser = Arc::new(HttpBrowser::new().unwrap());
        let mut registry = ToolRegistry::new();
        registry
            .register_all(builtin_descriptors(Path::new("."), browser))
            .unwrap();
        assert_eq!(registry.len(), 13);
        assert!(registry.resolve("goto_url").unwrap().takes_session());
        assert!(!registry.resolve("read_file").unwrap().takes_session());
    }
}
