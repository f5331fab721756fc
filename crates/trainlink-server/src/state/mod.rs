//! Shared device state.

mod store;

pub use store::StateStore;
