// Domain layer: spectrum models and ports (interfaces) implemented by the adapters.

pub mod model;
pub mod ports;
