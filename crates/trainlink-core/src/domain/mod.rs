//! Layout domain model: device identity, state, and the roster map.

pub mod device;
pub mod roster;
