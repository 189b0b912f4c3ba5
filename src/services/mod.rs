pub mod citations;
pub mod csv_export;
pub mod enricher;
pub mod extractor;
pub mod fetcher;
pub mod llm_service;
pub mod normalize;
pub mod output_store;
pub mod run_log;

pub use enricher::Enricher;
pub use fetcher::{Fetcher, RawDocument};
pub use llm_service::{AnnotationService, LlmService};
pub use output_store::{OutputStore, ReportPaths};
pub use run_log::RunLog;
