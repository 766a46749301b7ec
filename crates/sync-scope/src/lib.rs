pub mod scope;

pub use scope::{apply_prefix, current_prefix, key_scope, spawn_scoped};
