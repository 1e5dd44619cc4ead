mod artifacts;
mod canonicalizer;
mod definer;
mod events;
mod extractor;
mod parser;
mod preparse;
mod workflow;

pub use artifacts::{
    CANONICALIZATION_ARTIFACT, DEFINITION_ARTIFACT, DebugWriter, EXTRACTION_ARTIFACT,
    INTEGRATION_LOG_ARTIFACT, PREPARSED_ARTIFACT,
};
pub use canonicalizer::canonicalize;
pub use definer::{DEFINE_BATCH_SIZE, Definer};
pub use events::{EdcEvent, EdcOutcome, EdcStage};
pub use extractor::{Extractor, ExtractorConfig};
pub use parser::{DocumentParser, LocalTextParser, PaperParser, RemoteParser};
pub use preparse::PreParser;
pub use workflow::EdcWorkflow;
