//! Implementation of the analyzer.
//!
//! The analyzer is the request-driven entry point of the pipeline:
//! each public operation returns a handle whose `stable` future
//! resolves once that piece of the pipeline reaches a stable state.
//! Scheduling is single-threaded cooperative; the suspension points
//! are provider I/O and cache lookups. Handles cancel cooperatively:
//! a cancelled handle resolves to [`AnalysisError::Cancelled`] and
//! publishes nothing to the cache.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dts_grammar::Parse;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::Config;
use crate::FileDiagnostic;
use crate::cache::DocumentCache;
use crate::cache::MacroDefinitions;
use crate::context::ContextBuilder;
use crate::context::FileAst;
use crate::provider::SourceError;
use crate::provider::SourceProvider;
use crate::tree::DeviceTree;
use crate::types::TypeCatalogue;

/// An error produced by an analyzer operation.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The operation was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,

    /// A source failed to load.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// The boxed future backing a handle.
type HandleFuture<T> = Pin<Box<dyn Future<Output = Result<T, AnalysisError>> + Send>>;

/// A one-shot handle to an in-flight operation.
///
/// Awaiting [`stable`][Handle::stable] drives the operation to its
/// stable state. Cancelling through the handle's token makes the
/// future resolve to [`AnalysisError::Cancelled`] without publishing
/// partial results.
#[allow(missing_debug_implementations)]
pub struct Handle<T> {
    /// The cancellation token of the operation.
    token: CancellationToken,
    /// The future driving the operation.
    future: HandleFuture<T>,
}

impl<T> Handle<T> {
    /// Gets a clone of the cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancels the operation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Drives the operation to its stable state.
    pub async fn stable(self) -> Result<T, AnalysisError> {
        self.future.await
    }
}

/// A handle to an in-flight parse.
pub type ParseHandle = Handle<Arc<Parse>>;

/// A handle to an in-flight context analysis.
pub type ContextHandle = Handle<Analysis>;

/// The result of analyzing a context.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// The merged device tree.
    pub tree: DeviceTree,
    /// The analyzed files, in context order.
    pub files: Vec<FileAst>,
    /// The context and validation diagnostics.
    pub diagnostics: Vec<FileDiagnostic>,
}

impl Analysis {
    /// Gets every diagnostic of the context: per-file parse
    /// diagnostics followed by context and validation diagnostics.
    pub fn all_diagnostics(&self) -> Vec<FileDiagnostic> {
        let mut out = Vec::new();
        for file in &self.files {
            for diagnostic in file.parse.diagnostics() {
                out.push(FileDiagnostic {
                    uri: file.uri.clone(),
                    diagnostic: diagnostic.clone(),
                });
            }
        }

        out.extend(self.diagnostics.iter().cloned());
        out
    }
}

/// The analyzer: the public entry point of the analysis pipeline.
#[derive(Clone)]
pub struct Analyzer {
    /// The source provider.
    provider: Arc<dyn SourceProvider>,
    /// The tokenize+parse cache.
    cache: Arc<DocumentCache>,
    /// Preprocessor macro values handed through to the parser.
    macros: Arc<MacroDefinitions>,
    /// The binding catalogue used for validation.
    catalogue: Arc<TypeCatalogue>,
    /// The analysis configuration.
    config: Config,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Analyzer {
    /// Constructs an analyzer over the given source provider with a
    /// fresh cache, the standard binding catalogue, and the default
    /// configuration.
    pub fn new(provider: Arc<dyn SourceProvider>) -> Self {
        Self {
            provider,
            cache: Arc::new(DocumentCache::new()),
            macros: Arc::new(MacroDefinitions::new()),
            catalogue: Arc::new(TypeCatalogue::standard()),
            config: Config::default(),
        }
    }

    /// Replaces the preprocessor macro values handed through to the
    /// parser.
    ///
    /// Pair this with a fresh cache: cached parses are keyed by content
    /// only.
    pub fn with_macros(mut self, macros: MacroDefinitions) -> Self {
        self.macros = Arc::new(macros);
        self
    }

    /// Replaces the document cache.
    ///
    /// Embedders share one cache between analyzers to memoize parses
    /// process-wide.
    pub fn with_cache(mut self, cache: Arc<DocumentCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the binding catalogue.
    pub fn with_catalogue(mut self, catalogue: Arc<TypeCatalogue>) -> Self {
        self.catalogue = catalogue;
        self
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Gets the document cache.
    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    /// Starts parsing the given document.
    ///
    /// The returned handle resolves once the document's parse is
    /// stable; unchanged content resolves from the cache without
    /// reparsing.
    pub fn parse_document(&self, uri: Url) -> ParseHandle {
        let provider = self.provider.clone();
        let cache = self.cache.clone();
        let macros = self.macros.clone();
        let token = CancellationToken::new();
        let cancel = token.clone();
        let future = async move {
            let text = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                result = provider.load(&uri) => result?,
            };

            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            debug!(%uri, "document parse is stable");
            Ok(cache.get_or_parse(&uri, &text, &macros))
        };

        Handle {
            token,
            future: Box::pin(future),
        }
    }

    /// Starts analyzing a context.
    ///
    /// `file_map` is the ordered list of files of the context; its
    /// order is the include order of the merge. The returned handle
    /// resolves once every file has parsed, the runtime tree is
    /// built, and validation has run.
    pub fn analyze_context(&self, file_map: Vec<Url>) -> ContextHandle {
        let provider = self.provider.clone();
        let cache = self.cache.clone();
        let macros = self.macros.clone();
        let catalogue = self.catalogue.clone();
        let config = self.config.clone();
        let token = CancellationToken::new();
        let cancel = token.clone();
        let future = async move {
            let mut files = Vec::with_capacity(file_map.len());
            for uri in file_map {
                let text = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                    result = provider.load(&uri) => result?,
                };

                if cancel.is_cancelled() {
                    return Err(AnalysisError::Cancelled);
                }

                let parse = cache.get_or_parse(&uri, &text, &macros);
                files.push(FileAst {
                    uri: Arc::new(uri),
                    parse,
                });
            }

            let (tree, mut diagnostics) = ContextBuilder::build(&files, &config);
            diagnostics.extend(catalogue.validate(&tree, &config));
            debug!(
                files = files.len(),
                diagnostics = diagnostics.len(),
                "context analysis is stable"
            );

            Ok(Analysis {
                tree,
                files,
                diagnostics,
            })
        };

        Handle {
            token,
            future: Box::pin(future),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::provider::MemoryProvider;
    use crate::tree::NodePath;
    use crate::tree::NodeProperty;

    fn uri(s: &str) -> Url {
        Url::parse(s).expect("test uri should parse")
    }

    fn fixture() -> (Arc<MemoryProvider>, Analyzer) {
        let provider = Arc::new(MemoryProvider::new());
        let analyzer = Analyzer::new(provider.clone());
        (provider, analyzer)
    }

    #[tokio::test]
    async fn parse_and_analyze_a_context() {
        let (provider, analyzer) = fixture();
        let base = uri("memory:///base.dtsi");
        let board = uri("memory:///board.dts");
        provider.insert(
            base.clone(),
            "/ { soc { uart: serial@1c00 { reg = <0x1c00 0x100>; status = \"disabled\"; }; }; };",
        );
        provider.insert(board.clone(), "&uart { status = \"okay\"; };");

        let parse = analyzer
            .parse_document(base.clone())
            .stable()
            .await
            .expect("parse should succeed");
        assert_eq!(parse.diagnostics().len(), 0);

        let analysis = analyzer
            .analyze_context(vec![base, board])
            .stable()
            .await
            .expect("analysis should succeed");

        let serial = analysis
            .tree
            .node_at(&NodePath::new(["soc", "serial@1c00"]))
            .expect("serial should exist");
        assert_eq!(
            serial.property("status").and_then(NodeProperty::as_string),
            Some("okay")
        );

        // The override produces exactly one hint.
        assert_eq!(analysis.diagnostics.len(), 1);
        assert_eq!(analysis.all_diagnostics().len(), 1);
    }

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let (_, analyzer) = fixture();
        let result = analyzer
            .parse_document(uri("memory:///missing.dts"))
            .stable()
            .await;
        assert!(matches!(
            result,
            Err(AnalysisError::Source(SourceError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn cancellation_publishes_nothing() {
        let (provider, analyzer) = fixture();
        let board = uri("memory:///board.dts");
        provider.insert(board.clone(), "/ {};");

        let handle = analyzer.parse_document(board.clone());
        handle.cancel();
        let result = handle.stable().await;
        assert!(matches!(result, Err(AnalysisError::Cancelled)));
        assert!(analyzer.cache().get(&board).is_none());
    }

    #[tokio::test]
    async fn context_reuses_cached_parses() {
        let (provider, analyzer) = fixture();
        let board = uri("memory:///board.dts");
        provider.insert(board.clone(), "/ {};");

        let parse = analyzer
            .parse_document(board.clone())
            .stable()
            .await
            .expect("parse should succeed");
        let analysis = analyzer
            .analyze_context(vec![board])
            .stable()
            .await
            .expect("analysis should succeed");
        assert!(Arc::ptr_eq(&parse, &analysis.files[0].parse));
    }

    #[tokio::test]
    async fn edits_invalidate_the_cache() {
        let (provider, analyzer) = fixture();
        let board = uri("memory:///board.dts");
        provider.insert(board.clone(), "/ {};");

        let first = analyzer
            .parse_document(board.clone())
            .stable()
            .await
            .expect("parse should succeed");

        provider.insert(board.clone(), "/ { chosen {}; };");
        let second = analyzer
            .parse_document(board.clone())
            .stable()
            .await
            .expect("parse should succeed");
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
