mod events;
mod resolver;
mod workflow;

pub use events::{IntegrationEvent, IntegrationOutcome, IntegrationStage};
pub use resolver::{EntityResolver, ResolutionOutcome};
pub use workflow::{IntegrationWorkflow, rewrite_fragment};
