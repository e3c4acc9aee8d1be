pub mod auth;
pub mod error;
pub mod metered;
pub mod rest;
pub mod router;
pub mod state;
pub mod usage;

pub use router::build_router;
pub use state::AppState;
