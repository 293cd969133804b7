// Pipeline stages, head first
pub mod assembler;
pub mod resolver;
pub mod sink;
pub mod transform;

// Re-exports
pub use assembler::{AggregateAssembler, RowFolder};
pub use resolver::MultiHopResolver;
pub use sink::IndexSink;
pub use transform::{TransformRules, TransformStage};
