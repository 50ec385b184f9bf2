pub mod error;
pub mod memory;
pub mod repository;

pub use error::StorageError;
pub use memory::InMemoryRepository;
pub use repository::Repository;
