use std::fmt;

use crate::{DConfigError, Result};

/// Identity of one configuration resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    app_id: String,
    file_name: String,
    subpath: String,
}

impl ResourceId {
    /// Validates and builds an identity.
    ///
    /// # Errors
    /// Returns `DConfigError::InvalidIdentity` if the application id or file
    /// name is empty or contains `/`, or if the subpath is neither empty nor
    /// an absolute path made of plain components.
    pub fn new(app_id: &str, file_name: &str, subpath: &str) -> Result<Self> {
        validate_segment("application id", app_id)?;
        validate_segment("file name", file_name)?;
        validate_subpath(subpath)?;

        Ok(Self {
            app_id: app_id.to_string(),
            file_name: file_name.to_string(),
            subpath: subpath.to_string(),
        })
    }

    /// Application id
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Configuration file name, without extension
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Subpath namespacing variants of the same file, possibly empty
    pub fn subpath(&self) -> &str {
        &self.subpath
    }

    /// Canonical registry key, `{app_id}/{file_name}{subpath}`.
    pub fn key(&self) -> String {
        format!("{}/{}{}", self.app_id, self.file_name, self.subpath)
    }

    /// Subpath prefixes from deepest to shallowest, ending with the empty prefix.
    ///
    /// `/a/b` yields `["/a/b", "/a", ""]`.
    pub fn subpath_chain(&self) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.subpath.as_str();

        while !current.is_empty() {
            chain.push(current);
            current = match current.rfind('/') {
                Some(idx) => &current[..idx],
                None => "",
            };
        }

        chain.push("");
        chain
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn validate_segment(what: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(DConfigError::InvalidIdentity {
            reason: format!("{what} is empty"),
        });
    }

    if segment.contains('/') || segment == "." || segment == ".." {
        return Err(DConfigError::InvalidIdentity {
            reason: format!("{what} '{segment}' is not a single path segment"),
        });
    }

    Ok(())
}

fn validate_subpath(subpath: &str) -> Result<()> {
    if subpath.is_empty() {
        return Ok(());
    }

    let Some(rest) = subpath.strip_prefix('/') else {
        return Err(DConfigError::InvalidIdentity {
            reason: format!("subpath '{subpath}' must start with '/'"),
        });
    };

    let has_bad_component = rest
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..");

    if has_bad_component {
        return Err(DConfigError::InvalidIdentity {
            reason: format!("subpath '{subpath}' contains empty or relative components"),
        });
    }

    Ok(())
}
