mod errors;
pub mod interfaces;
mod mappers;
pub mod memory;
pub mod sqlite;

pub use errors::StoreError;
pub use interfaces::TaskStore;
