//! Device profiles, device registry and the protocol transport boundary.
//!
//! ## Architecture
//!
//! - **ProfileRegistry**: storage for device profiles and device instances
//! - **ProfileResolver**: lookup interface the command layer depends on
//! - **Transport**: protocol client boundary, one request per sub-operation
//! - **SimulatedTransport**: in-memory server used by the CLI and tests

pub mod error;
pub mod profile;
pub mod registry;
pub mod simulated;
pub mod transport;

pub use error::DeviceError;
pub use profile::{
    AdminState, CommandDefinition, DeviceConfig, DeviceObject, DeviceProfile, ObjectDefinition,
    ResourceOperation,
};
pub use registry::{NodeBinding, ProfileRegistry, ProfileResolver};
pub use simulated::{SimulatedNode, SimulatedTransport, SimulationConfig};
pub use transport::{
    ProtocolRequest, ProtocolResponse, RequestAction, StatusCode, Transport, TransportError,
};
