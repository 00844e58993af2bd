//! Hybrid compute routing: capability negotiation and dispatch.
//!
//! Decides, per image-processing operation, whether it runs on the catalog
//! server or on this device's own hardware. The decision is driven by the
//! server's advertised capabilities (cached with a TTL) plus one explicit
//! fallback signal the server can return mid-operation.

pub mod capability;
pub mod dispatch;
pub mod executor;

pub use capability::{CapabilityProbe, CapabilityRegistry, ExecutionMode, ServerCapabilities};
pub use dispatch::{
    ComputeDispatcher, DecisionSource, DispatchDecision, DispatchError, DispatchOutcome,
    ExecTarget, RemoteProcessor,
};
pub use executor::{LocalExecuteError, LocalExecutor, Operation, ProcessParams};
