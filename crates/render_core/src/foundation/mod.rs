//! Foundation utilities shared by every subsystem
//!
//! - **ids**: process-wide identifier allocation and the typed id newtypes
//! - **diagnostics**: the injected logging collaborator

pub mod diagnostics;
pub mod ids;

pub use diagnostics::{
    default_diagnostics, CapturedRecord, CapturingDiagnostics, Diagnostics, LogDiagnostics,
    NullDiagnostics,
};
pub use ids::{IdPool, InstanceId, LightId, MaterialId, ShaderId};
