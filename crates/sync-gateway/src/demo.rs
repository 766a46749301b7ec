//! Demo synced objects wired up for every connection: a plain counter, a
//! camelCase-aliased person, an object with a validated action, and one
//! with a cancellable background task. These exercise each scenario in
//! spec.md §8 end-to-end over a real transport instead of a mock one.

use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use sync_engine::{action, task, task_cancel, Result, Sync, SyncBuilder, SyncEngineError, SyncModel, SyncSchema};
use sync_session::Session;

#[derive(Debug, Default)]
pub struct Counter {
    pub value: i64,
}

impl SyncModel for Counter {
    fn schema() -> &'static SyncSchema {
        static SCHEMA: OnceLock<SyncSchema> = OnceLock::new();
        SCHEMA.get_or_init(|| SyncSchema {
            field_names: &["value"],
        })
    }

    fn snapshot(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("value".to_string(), json!(self.value));
        map
    }

    fn set_field(&mut self, wire_key: &str, value: Value) -> Result<()> {
        match wire_key {
            "value" => {
                self.value = serde_json::from_value(value)
                    .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
                Ok(())
            }
            other => Err(SyncEngineError::Validation(format!("unknown field {other}"))),
        }
    }
}

#[derive(Debug, Default)]
pub struct Person {
    pub first_name: String,
    pub last_name: String,
}

impl SyncModel for Person {
    fn schema() -> &'static SyncSchema {
        static SCHEMA: OnceLock<SyncSchema> = OnceLock::new();
        SCHEMA.get_or_init(|| SyncSchema {
            field_names: &["first_name", "last_name"],
        })
    }

    fn snapshot(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            sync_engine::to_camel_case("first_name"),
            json!(self.first_name),
        );
        map.insert(
            sync_engine::to_camel_case("last_name"),
            json!(self.last_name),
        );
        map
    }

    fn set_field(&mut self, wire_key: &str, value: Value) -> Result<()> {
        if wire_key == sync_engine::to_camel_case("first_name") {
            self.first_name = serde_json::from_value(value)
                .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
            Ok(())
        } else if wire_key == sync_engine::to_camel_case("last_name") {
            self.last_name = serde_json::from_value(value)
                .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
            Ok(())
        } else {
            Err(SyncEngineError::Validation(format!(
                "unknown field {wire_key}"
            )))
        }
    }
}

#[derive(Debug, Default)]
pub struct User {
    pub name: String,
}

impl SyncModel for User {
    fn schema() -> &'static SyncSchema {
        static SCHEMA: OnceLock<SyncSchema> = OnceLock::new();
        SCHEMA.get_or_init(|| SyncSchema {
            field_names: &["name"],
        })
    }

    fn snapshot(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".to_string(), json!(self.name));
        map
    }

    fn set_field(&mut self, wire_key: &str, value: Value) -> Result<()> {
        match wire_key {
            "name" => {
                self.name = serde_json::from_value(value)
                    .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
                Ok(())
            }
            other => Err(SyncEngineError::Validation(format!("unknown field {other}"))),
        }
    }
}

#[derive(Deserialize)]
struct UpdateNameArgs {
    new_name: String,
}

/// spec.md §8 scenario 3: validation failure must leave state unchanged and
/// must not simply rely on a type mismatch — `new_name` deserializes fine as
/// a string, so the 2..50 length bound is enforced by hand here the way a
/// schema library's field constraint would be in the original source.
const NAME_MIN_LEN: usize = 2;
const NAME_MAX_LEN: usize = 50;

#[derive(Debug, Default)]
pub struct Notepad {
    pub lines: Vec<String>,
}

impl SyncModel for Notepad {
    fn schema() -> &'static SyncSchema {
        static SCHEMA: OnceLock<SyncSchema> = OnceLock::new();
        SCHEMA.get_or_init(|| SyncSchema {
            field_names: &["lines"],
        })
    }

    fn snapshot(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("lines".to_string(), json!(self.lines));
        map
    }

    fn set_field(&mut self, wire_key: &str, value: Value) -> Result<()> {
        match wire_key {
            "lines" => {
                self.lines = serde_json::from_value(value)
                    .map_err(|e| SyncEngineError::Validation(e.to_string()))?;
                Ok(())
            }
            other => Err(SyncEngineError::Validation(format!("unknown field {other}"))),
        }
    }
}

/// The four demo Syncs kept alive for as long as their Session is: dropping
/// this struct is what would deregister their handlers (spec.md §4.10), so
/// callers must hold it for the Session's full lifetime, not just one
/// connection.
pub struct DemoObjects {
    pub counter: Sync<Counter>,
    pub person: Sync<Person>,
    pub user: Sync<User>,
    pub notepad: Sync<Notepad>,
}

pub async fn register_demo_objects(session: &std::sync::Arc<Session>) -> Result<DemoObjects> {
    session
        .clone()
        .bind(async {
            let counter = SyncBuilder::new(Counter::default(), "COUNTER").build().await?;

            let person = SyncBuilder::new(
                Person {
                    first_name: "John".to_string(),
                    last_name: "Doe".to_string(),
                },
                "PERSON",
            )
            .build()
            .await?;

            let user = SyncBuilder::new(User::default(), "USER")
                .action(action::<User, UpdateNameArgs, _, _>(
                    "UPDATE_NAME",
                    |target, args| async move {
                        let len = args.new_name.chars().count();
                        if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
                            return Err(SyncEngineError::Validation(format!(
                                "new_name must be {NAME_MIN_LEN}..{NAME_MAX_LEN} characters, got {len}"
                            )));
                        }
                        target.lock().await.name = args.new_name;
                        Ok(())
                    },
                ))
                .build()
                .await?;

            let notepad = SyncBuilder::new(Notepad::default(), "NOTEPAD")
                .expose_running_tasks("runningTasks")
                .task(task::<Notepad, Value, _, _>(
                    "APPEND_TICKS",
                    |target, _kwargs| async move {
                        loop {
                            {
                                let mut guard = target.lock().await;
                                let next = guard.lines.len() + 1;
                                guard.lines.push(format!("tick {next}"));
                            }
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    },
                ))
                .task_cancel(task_cancel::<Notepad, _, _>("APPEND_TICKS", |target| async move {
                    target.lock().await.lines.push("stopped".to_string());
                }))
                .build()
                .await?;

            Ok(DemoObjects {
                counter,
                person,
                user,
                notepad,
            })
        })
        .await
}
