//! Remote actions: commands (and queries) fired at the instrument.

use super::template::CommandTemplate;
use super::BindingId;
use crate::device::Device;
use crate::error::{AppResult, LabError};
use crate::value::{Settings, Value};
use std::time::Duration;
use tracing::debug;

/// Token prefixed to a command so the instrument finishes pending operations first.
pub const WAIT_BEFORE_TOKEN: &str = "*WAI;";

/// What an action does with the resolved command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    /// Send the command (optionally waiting for completion).
    Write,
    /// Send the command and return the text response.
    Query,
    /// Send the command and return the binary block payload.
    QueryBlock,
}

/// Result of invoking an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutput {
    /// Command sent, nothing to report.
    Done,
    /// Text response (query result, completion code or drained response).
    Response(String),
    /// Binary block payload.
    Block(Vec<u8>),
}

impl ActionOutput {
    /// Text response, if any.
    pub fn response(&self) -> Option<&str> {
        match self {
            ActionOutput::Response(text) => Some(text),
            _ => None,
        }
    }

    /// Binary payload, if any.
    pub fn into_block(self) -> Option<Vec<u8>> {
        match self {
            ActionOutput::Block(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Per-invocation arguments and overrides.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    params: Settings,
    wait_until_done: Option<bool>,
    wait_before: Option<bool>,
    max_wait: Option<Option<Duration>>,
    read_on_write: Option<bool>,
}

impl CallArgs {
    /// No arguments, action defaults apply.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for a command placeholder.
    pub fn arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Override completion waiting.
    pub fn wait_until_done(mut self, enabled: bool) -> Self {
        self.wait_until_done = Some(enabled);
        self
    }

    /// Override the `*WAI;` prefix.
    pub fn wait_before(mut self, enabled: bool) -> Self {
        self.wait_before = Some(enabled);
        self
    }

    /// Override the completion-wait ceiling (`None` waits indefinitely).
    pub fn max_wait(mut self, ceiling: Option<Duration>) -> Self {
        self.max_wait = Some(ceiling);
        self
    }

    /// Override draining of the response after the command.
    pub fn read_on_write(mut self, enabled: bool) -> Self {
        self.read_on_write = Some(enabled);
        self
    }
}

/// A remote action bound to one command template.
#[derive(Debug, Clone)]
pub struct RemoteAction {
    id: BindingId,
    name: String,
    template: CommandTemplate,
    mode: ActionMode,
    defaults: Settings,
    wait_until_done: bool,
    wait_before: bool,
    max_wait: Option<Duration>,
    read_on_write: bool,
}

impl RemoteAction {
    fn with_mode(name: impl Into<String>, template: impl Into<String>, mode: ActionMode) -> Self {
        Self {
            id: BindingId::next(),
            name: name.into(),
            template: CommandTemplate::new(template),
            mode,
            defaults: Settings::new(),
            wait_until_done: false,
            wait_before: false,
            max_wait: None,
            read_on_write: false,
        }
    }

    /// Action that sends a command.
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::with_mode(name, template, ActionMode::Write)
    }

    /// Action that returns the instrument's text response.
    pub fn query(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::with_mode(name, template, ActionMode::Query)
    }

    /// Action that returns a binary block.
    pub fn query_block(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::with_mode(name, template, ActionMode::QueryBlock)
    }

    /// Default value for a placeholder; call arguments override it.
    pub fn with_default(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.to_string(), value.into());
        self
    }

    /// Wait for completion (`*OPC?`) after sending by default.
    pub fn wait_until_done(mut self) -> Self {
        self.wait_until_done = true;
        self
    }

    /// Prefix `*WAI;` by default.
    pub fn wait_before(mut self) -> Self {
        self.wait_before = true;
        self
    }

    /// Default ceiling on completion waiting.
    pub fn with_max_wait(mut self, ceiling: Duration) -> Self {
        self.max_wait = Some(ceiling);
        self
    }

    /// Drain (and return) the response the instrument sends after this command.
    pub fn read_on_write(mut self) -> Self {
        self.read_on_write = true;
        self
    }

    /// Opaque identity of this binding.
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Attribute name on the driver.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command template.
    pub fn template(&self) -> &CommandTemplate {
        &self.template
    }

    /// What the action does.
    pub fn mode(&self) -> ActionMode {
        self.mode
    }

    /// Build the command for this invocation.
    ///
    /// Placeholder values: action defaults, overridden by the device's query
    /// parameters, overridden by explicit call arguments.
    pub fn resolve(&self, device: &Device, args: &CallArgs) -> AppResult<String> {
        let mut params = self.defaults.clone();
        for (k, v) in device.query_params() {
            params.insert(k.clone(), v.clone());
        }
        for (k, v) in &args.params {
            params.insert(k.clone(), v.clone());
        }
        let mut command = self.template.resolve(&params)?;
        if args.wait_before.unwrap_or(self.wait_before) {
            command.insert_str(0, WAIT_BEFORE_TOKEN);
        }
        Ok(command)
    }

    /// Fire the action.
    pub fn invoke(&self, device: &mut Device, args: CallArgs) -> AppResult<ActionOutput> {
        if device
            .command_options(self.id)
            .is_some_and(|options| options.write_disabled())
        {
            return Err(LabError::WriteDisabled(self.name.clone()));
        }
        let command = self.resolve(device, &args)?;
        debug!(device = %device.id(), action = %self.name, %command, "invoke action");

        match self.mode {
            ActionMode::Query => Ok(ActionOutput::Response(
                device.query(&command)?.trim().to_string(),
            )),
            ActionMode::QueryBlock => Ok(ActionOutput::Block(device.query_block(&command)?)),
            ActionMode::Write => {
                let wait = args.wait_until_done.unwrap_or(self.wait_until_done);
                let max_wait = args.max_wait.unwrap_or(self.max_wait);
                if wait {
                    let code = device.wait_until_done(Some(&command), max_wait)?;
                    Ok(ActionOutput::Response(code))
                } else if args.read_on_write.unwrap_or(self.read_on_write) {
                    Ok(ActionOutput::Response(
                        device.query(&command)?.trim().to_string(),
                    ))
                } else {
                    device.write_command(&command)?;
                    Ok(ActionOutput::Done)
                }
            }
        }
    }
}
