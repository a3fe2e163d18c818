pub mod cooldown;
pub mod run;
pub mod status;

// Re-export command functions for convenience
pub use cooldown::{prune, reset};
pub use run::run;
pub use status::status;
