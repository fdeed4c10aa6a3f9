//! Data models shared across the engine.

mod catalogue;
mod harvest;
mod record;
mod task;

pub use catalogue::{Catalogue, CatalogueError, CatalogueNode, DistrictNode, TalukaNode};
pub use harvest::{LabeledFields, RawHarvest, SelectedLocation, TableBlock, TableKind};
pub use record::{
    ClassifiedTerm, Encumbrance, EncumbranceKind, LandDetails, LandType, NamedCode, Owner,
    OwnershipType, PropertyIdentity, RecordLocation, RecordMeta, StructuredRecord,
};
pub use task::{embedded_number, LocationTask, SurveyFilter, TaskId};
