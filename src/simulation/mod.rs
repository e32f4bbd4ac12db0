//! Simulation substrate: vessels, their random streams, and the biology they obey

pub mod biology;
pub mod rng;
pub mod substrate;
pub mod vessel;

pub use biology::{AxisMorphology, BiologyTable, CellLine, CompoundParams};
pub use rng::{AssayStream, RngStreams, StreamSnapshot};
pub use substrate::Substrate;
pub use vessel::{DeathMode, DeathPartition, Exposure, Vessel, VesselState};
