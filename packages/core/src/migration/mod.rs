//! Moving documents between protocol versions.
//!
//! [`rules`] holds the declarative transformations, [`registry`] the owned
//! rule table and path finding, [`engine`] the all-or-nothing [`Migrator`],
//! and [`roundtrip`] the lossiness check built on top of it.

pub mod engine;
pub mod registry;
pub mod roundtrip;
pub mod rules;

pub use engine::{MigrationOptions, MigrationResult, Migrator};
pub use registry::MigrationRegistry;
pub use roundtrip::{MigrationValidator, RoundTripReport};
pub use rules::{FieldTarget, MigrationRule, StepValidation, TransformError, Transformation};
