// Domain layer: plan models, outcome records and the runtime port.

pub mod model;
pub mod outcome;
pub mod ports;
