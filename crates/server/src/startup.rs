//! Startup configuration persistence.
//!
//! One schema-validated XML document. Written atomically (temp file +
//! rename) so a crash mid-save never corrupts the boot config.

use std::io::Write;
use std::path::Path;

use netd_yang::tree::DataNode;
use netd_yang::{validate, xml, SchemaRegistry, NETCONF_NS};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: String,
        source: netd_yang::CodecError,
    },

    #[error("startup document is invalid: {0}")]
    Invalid(netd_yang::RpcError),
}

/// Load the startup document. `Ok(None)` when the file does not exist
/// (first boot); invalid content is an error, not a silent reset.
pub fn load(path: &Path, registry: &SchemaRegistry) -> Result<Option<DataNode>, StartupError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StartupError::Read {
                path: path.display().to_string(),
                source: e,
            })
        }
    };

    let document = xml::parse(&bytes).map_err(|e| StartupError::Parse {
        path: path.display().to_string(),
        source: e,
    })?;
    validate::validate_config_forest(&document.children, registry)
        .map_err(StartupError::Invalid)?;

    let mut root = DataNode::container("data");
    root.children = document.children;
    tracing::info!(path = %path.display(), nodes = root.size(), "loaded startup configuration");
    Ok(Some(root))
}

/// Persist a datastore root as the startup document.
pub fn save(path: &Path, root: &DataNode) -> Result<(), StartupError> {
    let mut document = DataNode::container("config").with_namespace(NETCONF_NS);
    document.children = root.children.clone();
    let bytes = xml::serialize(&document);

    let write_err = |source| StartupError::Write {
        path: path.display().to_string(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")
        .map_err(write_err)?;
    tmp.write_all(&bytes).map_err(write_err)?;
    tmp.write_all(b"\n").map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    tracing::debug!(path = %path.display(), "saved startup configuration");
    Ok(())
}
