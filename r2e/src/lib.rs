//! R2E — a Quarkus-like ergonomic layer over Axum.
//!
//! This facade crate re-exports all R2E sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use r2e::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature       | Default | Crate                     |
//! |---------------|---------|---------------------------|
//! | `security`    | **yes** | `r2e-security`            |
//! | `utils`       | **yes** | `r2e-utils`               |
//! | `scheduler`   | no      | `r2e-scheduler`           |
//! | `cache`       | no      | `r2e-cache`               |
//! | `validation`  | no      | `r2e-core/validation`     |
//! | `full`        | no      | All of the above          |

// Re-export sub-crates as public modules so they're accessible as
// `r2e::r2e_core`, `r2e::r2e_security`, etc.
//
// The proc macros use `proc-macro-crate` to detect whether the user depends
// on `r2e` (facade) or individual crates, and generate the correct paths.
pub extern crate r2e_core;
pub extern crate r2e_macros;

// Re-export everything from r2e-core at the top level for convenience.
pub use r2e_core::*;

#[cfg(feature = "security")]
pub use r2e_security;

#[cfg(feature = "utils")]
pub use r2e_utils;

#[cfg(feature = "scheduler")]
pub use r2e_scheduler;

#[cfg(feature = "cache")]
pub use r2e_cache;

/// Convenience type aliases that depend on types from optional sub-crates.
pub mod types {
    pub use r2e_core::types::*;
}

/// Unified prelude — import everything with `use r2e::prelude::*`.
///
/// Includes the core prelude plus types from all enabled feature crates.
pub mod prelude {
    pub use r2e_core::prelude::*;
    pub use crate::types::*;

    #[cfg(feature = "security")]
    pub use r2e_security::prelude::*;

    #[cfg(feature = "utils")]
    pub use r2e_utils::prelude::*;
}
