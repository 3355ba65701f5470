//! Cross-file analysis of Devicetree Source (DTS) documents.
//!
//! The pipeline: per-file parses (memoized in a [`DocumentCache`])
//! fold in include order into a merged [`DeviceTree`], applying
//! override and deletion semantics and resolving `&label` references;
//! the [`TypeCatalogue`] then validates every property of the merged
//! tree against the devicetree standard bindings.
//!
//! The [`Analyzer`] is the request-driven entry point: operations
//! return one-shot handles that resolve when their piece of the
//! pipeline is stable, and cancel cooperatively.

use std::sync::Arc;

use dts_grammar::Diagnostic;
use url::Url;

mod analyzer;
mod cache;
mod config;
mod context;
pub mod diagnostics;
mod provider;
mod tree;
mod types;
mod validation;

pub use analyzer::Analysis;
pub use analyzer::AnalysisError;
pub use analyzer::Analyzer;
pub use analyzer::ContextHandle;
pub use analyzer::Handle;
pub use analyzer::ParseHandle;
pub use cache::DocumentCache;
pub use cache::MacroDefinitions;
pub use config::Config;
pub use context::ContextBuilder;
pub use context::FileAst;
pub use provider::MemoryProvider;
pub use provider::SourceError;
pub use provider::SourceProvider;
pub use tree::DeviceTree;
pub use tree::Node;
pub use tree::NodeDefinition;
pub use tree::NodeLabel;
pub use tree::NodePath;
pub use tree::NodeProperty;
pub use tree::Sourced;
pub use types::AdditionalCheck;
pub use types::BindingName;
pub use types::CheckContext;
pub use types::PropertyBinding;
pub use types::PropertyType;
pub use types::Requirement;
pub use types::RequirementLevel;
pub use types::TypeCatalogue;
pub use types::TypeSlot;

/// A diagnostic attributed to the file it was raised in.
#[derive(Debug, Clone)]
pub struct FileDiagnostic {
    /// The URI of the file.
    pub uri: Arc<Url>,
    /// The diagnostic.
    pub diagnostic: Diagnostic,
}
