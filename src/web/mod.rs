pub mod admin;
pub mod auth;
pub mod data;
pub mod files;
pub mod models;
pub mod policy;
pub mod responses;
pub mod router;
pub mod state;
pub mod storage;
#[cfg(test)]
pub mod testing;
pub mod uploads;

pub use auth::AuthUser;
pub use state::AppState;
