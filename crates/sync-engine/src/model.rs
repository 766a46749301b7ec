use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Per-type schema table, the Rust counterpart to the reflection this
/// system's source performs at instance-construction time
/// (`ws_sync/sync.py::Sync.__init__` scanning `dir(obj)`). Implementors build
/// this once (typically behind a `static OnceLock`, "cached at the class
/// level" per spec.md's design notes) instead of re-discovering fields on
/// every `Sync::all`/`Sync::only` call.
#[derive(Debug, Clone, Copy)]
pub struct SyncSchema {
    /// Wire-facing field names this type publishes, in declaration order.
    pub field_names: &'static [&'static str],
}

/// A server-owned domain object that can be synced. Implementors own their
/// own attribute-to-wire-name casing (the equivalent of a Pydantic
/// `alias_generator`) inside `snapshot`/`set_field` — there is no separate
/// runtime alias-resolution step, per spec.md design note 9.
pub trait SyncModel: Send + Sync + 'static {
    /// The field table for this type, cached once per type.
    fn schema() -> &'static SyncSchema
    where
        Self: Sized;

    /// Wire-keyed JSON view of every field `schema().field_names` names.
    fn snapshot(&self) -> Map<String, Value>;

    /// Validate and assign one field by its wire key. Implementors MUST
    /// return `Ok(())` without effect for a known but read-only (computed)
    /// field, so `SET`/`PATCH` can silently skip it (spec.md §7, item 8).
    /// An unrecognized key or a value that fails validation is an `Err`.
    fn set_field(&mut self, wire_key: &str, value: Value) -> Result<()>;
}

/// The combined schema spec.md §4.11 asks the Synced mixin to publish: the
/// model's own field table merged with the names of every action/task
/// validator registered on a particular `Sync<T>` instance. Fields are known
/// per-type ([`SyncSchema`], cached once); actions/tasks are only known once
/// a `SyncBuilder` has actually registered them, so this is assembled per
/// instance instead of as a second static table.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaExport {
    pub key: String,
    pub fields: Vec<&'static str>,
    pub actions: Vec<String>,
    pub tasks: Vec<String>,
}

/// `hello_world` → `helloWorld`. The Rust counterpart of
/// `ws_sync/utils.py::toCamelCase`, available to `SyncModel` implementors
/// that want camelCase wire names without hand-rolling the conversion.
pub fn to_camel_case(snake_case: &str) -> String {
    let mut result = String::with_capacity(snake_case.len());
    let mut capitalize_next = false;
    for (i, part) in snake_case.split('_').enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            result.push_str(part);
        } else {
            capitalize_next = true;
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                if capitalize_next {
                    result.extend(first.to_uppercase());
                } else {
                    result.push(first);
                }
            }
            result.push_str(chars.as_str());
        }
    }
    result
}

/// `helloWorld` → `hello_world`. The inverse of [`to_camel_case`], used to
/// let action/task kwargs validators accept either spelling of a key
/// (spec.md §4.8: "accepts inputs under either attribute names or the
/// configured aliases").
pub fn to_snake_case(camel_case: &str) -> String {
    let mut result = String::with_capacity(camel_case.len() + 4);
    for ch in camel_case.chars() {
        if ch.is_uppercase() {
            result.push('_');
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
