pub mod clock;
pub mod handle;
pub mod handlers;
pub mod server;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::SecretStore,
}

pub use server::{resolve_data_dir, router, run, ServerConfig};
