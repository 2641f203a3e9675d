//! Error handling types for the commodore application

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for catalog compilation
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown {kind} '{name}'. Please add it to 'parameters.{key}'")]
    UnknownDependency {
        kind: String,
        name: String,
        key: String,
    },

    #[error("Version override specified for {kind} '{name}' which has no URL")]
    AmbiguousVersionOverride { kind: String, name: String },

    #[error("Duplicate component alias '{alias}': components {components} are aliased to '{alias}'")]
    DuplicateInstance { alias: String, components: String },

    #[error("Component {component} with alias {alias} does not support instantiation.")]
    InstancingNotSupported { component: String, alias: String },

    #[error("Component {component} with alias {alias} does not support overriding compiled version.")]
    MultiVersionNotSupported { component: String, alias: String },

    #[error("Invalid library alias '{alias}' for component '{component}': {message}")]
    LibraryPrefixConflict {
        component: String,
        alias: String,
        message: String,
    },

    #[error("Unable to reach Git remote '{url}': {stderr}")]
    UnreachableRemote { url: String, stderr: String },

    #[error("Revision '{revision}' not found in repository '{url}'")]
    UnresolvedRevision { url: String, revision: String },

    #[error("Worktree '{}' has local modifications, use --force to discard them", worktree.display())]
    DirtyWorktree { worktree: PathBuf },

    #[error("Git command `git {command}` failed for {url}: {stderr}")]
    GitCommand {
        command: String,
        url: String,
        stderr: String,
    },

    #[error("While rendering inventory: {message}")]
    Render { message: String },

    #[error("Templating engine failed for targets {targets}:\n{stderr}")]
    Engine { targets: String, stderr: String },

    #[error("Postprocessing filter '{filter}' failed for instance '{instance}': {message}")]
    Filter {
        filter: String,
        instance: String,
        message: String,
    },

    #[error("Failed to push to the catalog repository: {message}")]
    CatalogPush { message: String },

    #[error("While querying Lieutenant at {url}: {message}")]
    Api { url: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Shorthand for a `Config` error from anything printable.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a `Render` error from anything printable.
    pub fn render(message: impl Into<String>) -> Self {
        Error::Render {
            message: message.into(),
        }
    }
}

/// Result type alias for commodore operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_dependency_message() {
        let e = Error::UnknownDependency {
            kind: "component".to_string(),
            name: "nfs".to_string(),
            key: "components".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Unknown component 'nfs'. Please add it to 'parameters.components'"
        );
    }

    #[test]
    fn test_dirty_worktree_message() {
        let e = Error::DirtyWorktree {
            worktree: PathBuf::from("/work/dependencies/nfs"),
        };
        assert!(e.to_string().contains("--force"));
        assert!(e.to_string().contains("dependencies/nfs"));
    }
}
