//! Packaging dialects.
//!
//! An [`Assembler`] renders a submission into a [`PackageStream`] in one
//! concrete dialect. The [`AssemblerRegistry`] maps the packaging-spec URI
//! from a repository's assembly configuration to the assembler that
//! produces it; an unknown spec is rejected before any bytes move.

use std::{collections::HashMap, sync::Arc};

use deposit_config::AssemblySpec;
use deposit_package::PackageStream;
use deposit_types::Submission;
use thiserror::Error;

mod base;
mod mets;
mod nihms;

pub use base::{package_file_name, remediate_collisions, REMEDIATION_PREFIX};
pub use mets::{DspaceMetsAssembler, METS_SPEC_URI};
pub use nihms::{NihmsAssembler, NIHMS_SPEC_URI};

/// Failures raised while rendering a submission into a package.
#[derive(Debug, Error)]
pub enum AssemblerError {
    /// No assembler is registered for the requested packaging spec.
    #[error("Unacceptable packaging type: {0}")]
    UnacceptablePackaging(String),

    /// The submission carries nothing to deposit.
    #[error("submission {0} has no custodial files")]
    NoCustodialFiles(String),

    /// Emitting a generated control document failed.
    #[error("rendering {document}")]
    MetadataDocument {
        document: &'static str,
        #[source]
        source: quick_xml::Error,
    },
}

/// Renders submissions into packages of one dialect.
pub trait Assembler: Send + Sync {
    /// The packaging-spec URI this assembler produces.
    fn spec_uri(&self) -> &str;

    /// Materializes the submission into a package stream per the assembly
    /// spec. Entry ordering is stable: control documents where the dialect
    /// puts them, custodial files in the order the submission declares.
    fn assemble(
        &self,
        submission: &Submission,
        spec: &AssemblySpec,
    ) -> Result<PackageStream, AssemblerError>;
}

impl std::fmt::Debug for dyn Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Assembler").field(&self.spec_uri()).finish()
    }
}

/// Registry of assemblers keyed by packaging-spec URI.
pub struct AssemblerRegistry {
    by_spec: HashMap<String, Arc<dyn Assembler>>,
}

impl std::fmt::Debug for AssemblerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblerRegistry")
            .field("specs", &self.by_spec.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AssemblerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            by_spec: HashMap::new(),
        }
    }

    /// The built-in dialects: NIHMS bulk submission and DSpace METS SIP.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NihmsAssembler));
        registry.register(Arc::new(DspaceMetsAssembler));
        registry
    }

    pub fn register(&mut self, assembler: Arc<dyn Assembler>) {
        self.by_spec
            .insert(assembler.spec_uri().to_owned(), assembler);
    }

    /// The assembler for a spec URI, or the unacceptable-packaging error.
    pub fn lookup(&self, spec_uri: &str) -> Result<&Arc<dyn Assembler>, AssemblerError> {
        self.by_spec
            .get(spec_uri)
            .ok_or_else(|| AssemblerError::UnacceptablePackaging(spec_uri.to_owned()))
    }

    /// Convenience: look up by the spec's URI and assemble.
    pub fn assemble(
        &self,
        submission: &Submission,
        spec: &AssemblySpec,
    ) -> Result<PackageStream, AssemblerError> {
        self.lookup(&spec.spec_uri)?.assemble(submission, spec)
    }
}

impl Default for AssemblerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_spec_is_unacceptable() {
        let registry = AssemblerRegistry::with_defaults();
        let err = registry.lookup("urn:unknown").unwrap_err();
        assert!(err
            .to_string()
            .contains("Unacceptable packaging type: urn:unknown"));
    }

    #[test]
    fn default_registry_carries_both_dialects() {
        let registry = AssemblerRegistry::with_defaults();
        assert!(registry.lookup(NIHMS_SPEC_URI).is_ok());
        assert!(registry.lookup(METS_SPEC_URI).is_ok());
    }
}
