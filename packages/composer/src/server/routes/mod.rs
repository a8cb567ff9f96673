// HTTP routes
pub mod composes;
pub mod errors;
pub mod openapi;

pub use composes::*;
pub use errors::*;
pub use openapi::*;

/// All routes live under the versioned API prefix.
pub const API_PREFIX: &str = "/api/image-builder-composer/v2";
