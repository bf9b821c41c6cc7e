//! Script items and the single entry point script commands pass through
//!
//! Script sequencing itself lives outside this crate. Everything addressed to a script is
//! funnelled through [`ScriptCore::dispatch`], which validates the command and queues it in
//! arrival order for the executor to drain with [`ScriptCore::next_command`].

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, warn};

use crate::items::{TopicDecl, TopicItem};

/// Value of the `active_script` topic while nothing runs.
pub const IDLE: &str = "None";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    Start(String),
    Stop(String),
}

#[derive(Debug, Clone)]
pub struct Script {
    id: String,
    name: String,
}

impl Script {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl TopicItem for Script {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn topics(&self) -> Vec<TopicDecl> {
        vec![TopicDecl::inbound(format!("{}/set", self.id))]
    }

    fn read(&self, _key: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Default)]
pub struct ScriptCore {
    topics: HashMap<String, String>,
    names: HashMap<String, String>,
    queue: VecDeque<ScriptCommand>,
    active: Option<String>,
}

impl ScriptCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a fully-qualified topic with a script.
    pub fn register(&mut self, topic: impl Into<String>, script_id: &str, name: &str) {
        self.topics.insert(topic.into(), script_id.to_string());
        self.names.insert(script_id.to_string(), name.to_string());
    }

    pub fn dispatch(&mut self, topic: &str, payload: &str) {
        let Some(script_id) = self.topics.get(topic) else {
            debug!("No script registered for topic {}", topic);
            return;
        };
        let command = match payload.trim().to_lowercase().as_str() {
            "start" => ScriptCommand::Start(script_id.clone()),
            "stop" => ScriptCommand::Stop(script_id.clone()),
            _ => {
                info!(
                    "Script '{}' received invalid command '{}'. Ignoring.",
                    script_id, payload
                );
                return;
            }
        };
        debug!("Queueing {:?}", command);
        self.queue.push_back(command);
    }

    pub fn next_command(&mut self) -> Option<ScriptCommand> {
        self.queue.pop_front()
    }

    pub fn name_of(&self, script_id: &str) -> Option<&str> {
        self.names.get(script_id).map(String::as_str)
    }

    pub fn set_active(&mut self, name: Option<String>) {
        self.active = name;
    }

    pub fn active_script(&self) -> &str {
        self.active.as_deref().unwrap_or(IDLE)
    }

    /// Drains the queue, marking a started script active and clearing it on stop. Returns the
    /// number of commands applied.
    pub fn apply_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(command) = self.next_command() {
            match command {
                ScriptCommand::Start(id) => {
                    let name = self.name_of(&id).map(str::to_string);
                    if name.is_none() {
                        warn!("Start requested for unknown script '{}'", id);
                    }
                    info!("Script '{}' started", id);
                    self.set_active(name);
                }
                ScriptCommand::Stop(id) => {
                    info!("Script '{}' stopped", id);
                    self.set_active(None);
                }
            }
            applied += 1;
        }
        applied
    }
}
