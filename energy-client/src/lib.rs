pub mod db;
pub mod domain;
pub mod store;

pub use store::{EnergyStore, InMemoryStore, StoreContext, StoreError};
