//! Declarative relationship rules.
//!
//! Rule evaluation is split into a pure planning phase and an apply phase.
//! Planning projects the aspect payload into concrete edge merges and is
//! where every projection type error is caught, before anything is written;
//! apply then materializes the planned edges (auto-creating URN-only
//! destination entities where the rule opts in).

mod engine;
mod path;

pub use engine::{CreatedEntity, CreatedRelationship, PlannedEdge, RuleEngine};
pub use path::ProjectionPath;
