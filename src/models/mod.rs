pub mod enrichment;
pub mod identifier;
pub mod loaders;
pub mod outcome;
pub mod patent;
pub mod work_item;

pub use enrichment::{EnrichmentResult, EnrichmentSchema};
pub use loaders::{load_items, load_items_from_dir, load_replay_items};
pub use outcome::{BatchOutcome, BatchReport, FailureEntry, ReportManifest};
pub use patent::{validate_claims, PatentClaim, PatentRecord, PatentRecordBuilder, Provenance};
pub use work_item::{SourceType, Stage, WorkItem};
