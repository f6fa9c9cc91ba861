// Domain layer: value types and the collaborator traits at the hardware boundary.

pub mod model;
pub mod ports;
