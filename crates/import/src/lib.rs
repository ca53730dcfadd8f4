pub mod config;
pub mod coordinator;
pub mod decode;
pub mod detect;
pub mod error;
pub mod formats;
pub mod locale;
pub mod match_engine;
pub mod reconcile;
pub(crate) mod util;

pub use config::{ConfigError, Settings};
pub use coordinator::{CallerMetadata, ImportReport, Importer};
pub use decode::Encoding;
pub use detect::{DatevLayout, Format};
pub use error::{ImportError, RowWarning, Stage};
pub use formats::{ParseOutput, SourceFile};
pub use match_engine::{Confidence, MatchCandidate, MatchQuery, MatchStatus, MatchingEngine, ScoreBreakdown};
pub use reconcile::{
    BulkReconciler, DocumentOutcome, DocumentPipeline, ExtractionPipeline, InvoiceExtractor, MockExtractor,
    ReconcileError, ReconciliationSummary, ToMatchQuery,
};
