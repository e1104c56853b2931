//! Core abstractions shared by every stage of the pipeline.
//!
//! - [`schema`]: table, column and key metadata types
//! - [`value`]: SQL value representation and row batches
//! - [`traits`]: the reader/writer seams drivers implement
//!
//! The core module stays free of engine specifics; drivers
//! (`drivers/postgres`, `drivers/mysql`) implement the traits, and the
//! planner, reconciler, copier and verifier are written against them so
//! they can be tested with mock implementations.

pub mod schema;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use schema::{
    ColumnDescriptor, ForeignKeyRef, IndexSpec, PkValue, SemanticType, TableDescriptor,
};
pub use traits::{
    BatchOutcome, ConflictPolicy, ReadOptions, RowFailure, SourceReader, TargetWriter, WriteSpec,
};
pub use value::{Row, RowBatch, SqlValue};
