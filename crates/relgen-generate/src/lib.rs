//! Correlated test-data generation for relgen.
//!
//! Master entities are generated or imported from CSV into a per-run
//! [`ReferencePool`]; transactional entities are then streamed from it with
//! the configured correlation strength and handed to a [`Sink`].

pub mod correlated;
pub mod engine;
pub mod errors;
pub mod faker_rs;
pub mod generators;
pub mod master;
pub mod model;
pub mod output;
pub mod pool;
pub mod sink;

pub use correlated::{CorrelatedDataGenerator, record_key};
pub use engine::{GenerationEngine, GenerationResult};
pub use errors::GenerationError;
pub use faker_rs::{FakeRsFaker, Faker};
pub use master::MasterDataGenerator;
pub use model::{
    CorrelationRunStats, GenerateOptions, GenerationReport, LoadingStats, MemoryUsage,
    PoolTypeStats, RelationshipStats, TransactionalReport,
};
pub use pool::ReferencePool;
pub use sink::{
    JsonlSink, MemorySink, NullSink, ProducedMessage, Sink, SinkError, SinkFactory, StdoutSink,
};
