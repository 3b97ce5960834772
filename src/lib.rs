//! Headless client for the transformer fleet monitoring backend.
//!
//! Owns the authenticated session, the cached permission set, and the live
//! sensor feed that is merged into the region → district → depot →
//! transformer hierarchy.

pub mod config;
pub mod error;
pub mod state;
pub mod db;
pub mod sse;
pub mod storage;

pub mod crypto {
    pub mod jwt;
}

pub mod models {
    pub mod session;
    pub mod user;
    pub mod hierarchy;
    pub mod telemetry;
}

pub mod repositories {
    pub mod identity;
    pub mod resource;
}

pub mod services {
    pub mod auth;
    pub mod permissions;
    pub mod realtime;
    pub mod telemetry;
    pub mod hierarchy;
    pub mod dashboard;
}

pub mod middleware_layer {
    pub mod auth;
}

pub mod validation {
    pub mod auth;
}

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
