pub mod document;
pub mod ticket;

pub use document::{BaseRecord, FeatureFile, FeatureRecord, ProjectMetadata, TaskRecord};
pub use ticket::{Ticket, Tier};
