pub mod db;
pub mod error;
pub mod memory;
pub mod model;
pub mod repository;
pub mod secrets;

pub use db::RedbRepository;
pub use error::StoreError;
pub use memory::MemoryRepository;
pub use model::{NewSecret, SecretRecord, SecretView};
pub use repository::{InsertOutcome, SecretRepository};
pub use secrets::{ConsumeResult, SecretStore, MAX_SECRET_BYTES};
