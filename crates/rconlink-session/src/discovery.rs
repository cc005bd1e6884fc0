//! Command catalogue built from a server's introspection output.
//!
//! Discovery is advisory: callers use it to validate a command name or to
//! pick between equivalent names exposed by different server builds. When no
//! catalogue is available the command is attempted directly.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Keys that may name a command inside an introspection entry.
const NAME_KEYS: &[&str] = &["endpoint", "name", "command", "iD", "id"];

/// Keys that may hold a command's parameter list.
const ARG_KEYS: &[&str] = &["args", "arguments", "parameters", "dialogueParameters"];

/// Keys that may wrap the entry list.
const WRAPPER_KEYS: &[&str] = &["commands", "entries", "result"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub name: String,
    pub method: Option<String>,
    pub args: Vec<String>,
}

/// Supported commands of one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalogue {
    commands: BTreeMap<String, CommandInfo>,
}

/// Result of validating a command name against discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCheck {
    Known,
    Unknown,
    /// No catalogue could be obtained.
    Unverified,
}

impl Catalogue {
    /// Build a catalogue from introspection output.
    ///
    /// Returns `None` when the value contains no recognisable command entry.
    pub fn from_value(value: &Value) -> Option<Self> {
        let mut catalogue = Catalogue::default();
        catalogue.collect(value);
        (!catalogue.commands.is_empty()).then_some(catalogue)
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let commands = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                let info = CommandInfo {
                    name: name.clone(),
                    method: None,
                    args: Vec::new(),
                };
                (name, info)
            })
            .collect();
        Self { commands }
    }

    fn collect(&mut self, value: &Value) {
        match value {
            Value::Array(entries) => {
                for entry in entries {
                    if let Some(info) = entry_info(entry) {
                        self.commands.insert(info.name.clone(), info);
                    }
                }
            }
            Value::Object(object) => {
                if let Some(inner) = WRAPPER_KEYS.iter().find_map(|key| object.get(*key)) {
                    self.collect(inner);
                } else if let Some(info) = entry_info(value) {
                    self.commands.insert(info.name.clone(), info);
                }
            }
            // Introspection results sometimes arrive as JSON text.
            Value::String(text) => {
                if let Ok(inner) = serde_json::from_str::<Value>(text) {
                    if inner.is_array() || inner.is_object() {
                        self.collect(&inner);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn supports(&self, command: &str) -> bool {
        self.commands.contains_key(command)
    }

    pub fn check(&self, command: &str) -> CommandCheck {
        if self.supports(command) {
            CommandCheck::Known
        } else {
            CommandCheck::Unknown
        }
    }

    pub fn get(&self, command: &str) -> Option<&CommandInfo> {
        self.commands.get(command)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandInfo> {
        self.commands.values()
    }

    /// First variant the server supports.
    pub fn resolve<'a>(&self, variants: &[&'a str]) -> Option<&'a str> {
        variants.iter().copied().find(|name| self.supports(name))
    }

    /// The parameter name `command` expects, chosen from `candidates`.
    ///
    /// Falls back to the first candidate when the server does not describe
    /// the command's arguments.
    pub fn arg_name<'a>(&self, command: &str, candidates: &[&'a str]) -> Option<&'a str> {
        let args = self.get(command).map(|info| info.args.as_slice()).unwrap_or_default();
        candidates
            .iter()
            .copied()
            .find(|candidate| args.iter().any(|arg| arg == candidate))
            .or_else(|| candidates.first().copied())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn entry_info(entry: &Value) -> Option<CommandInfo> {
    match entry {
        Value::String(name) if !name.is_empty() => Some(CommandInfo {
            name: name.clone(),
            method: None,
            args: Vec::new(),
        }),
        Value::Object(object) => {
            let name = NAME_KEYS
                .iter()
                .filter_map(|key| object.get(*key))
                .find_map(|value| value.as_str().filter(|s| !s.is_empty()))?;
            let args = ARG_KEYS
                .iter()
                .find_map(|key| object.get(*key))
                .map(arg_names)
                .unwrap_or_default();
            Some(CommandInfo {
                name: name.to_string(),
                method: object
                    .get("method")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                args,
            })
        }
        _ => None,
    }
}

fn arg_names(args: &Value) -> Vec<String> {
    match args {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name.clone()),
                Value::Object(object) => NAME_KEYS
                    .iter()
                    .filter_map(|key| object.get(*key))
                    .find_map(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
