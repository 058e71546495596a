// src/server/mod.rs

//! Everything the scheduler knows about the external language-analysis
//! service: its last reported operating mode and the optional set of
//! notification capabilities it exposes.

pub mod capabilities;
pub mod mode;

pub use capabilities::{
    AnalysisService, Capability, ClasspathUpdates, ProjectImports, ServerModeChanges,
    ServiceListener, WiredCapabilities, wire_capabilities,
};
pub use mode::ServerModeTracker;
