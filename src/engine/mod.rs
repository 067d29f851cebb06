//! Engine abstraction: contracts, capability trait, config adapters,
//! registry and the per-backend implementations.

pub mod adapter;
pub mod cogview;
pub mod comfyui;
pub mod contracts;
pub mod dalle;
pub mod pollinations;
pub mod registry;
pub mod stability;
pub mod traits;

pub use contracts::{
    EngineDescriptor, EngineKind, EngineStatus, GenerationConfig, GenerationContext,
    GenerationResult, ProgressSink, Quality,
};
pub use registry::EngineRegistry;
pub use traits::{CountersSnapshot, EngineCore, EngineReport, ImageEngine};
