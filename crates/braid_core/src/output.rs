//! What tools produce and how agents route it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ContextItem;
use crate::error::Error;
use crate::registry::Registry;
use crate::turn::{Turn, TurnSnapshot};

/// One value produced by a tool.
///
/// An agent routes each produced value by its variant:
///
/// | variant                    | route                               |
/// |----------------------------|-------------------------------------|
/// | [`Output::Turn`]           | enqueued on the same agent          |
/// | [`Output::Context`], no id | appended to the agent's context queue |
/// | [`Output::Context`], id    | stored in the agent's context pool  |
/// | [`Output::Value`]          | surfaced to the caller              |
#[derive(Debug, Clone)]
pub enum Output {
    /// A plain result.
    Value(Value),
    /// Follow-up work for the same agent.
    Turn(Turn),
    /// Context for the agent's queue or pool.
    Context(ContextItem),
}

impl Output {
    /// A plain value.
    pub fn value(value: impl Into<Value>) -> Self {
        Output::Value(value.into())
    }

    /// The plain value, if this is one.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Output::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Consumes the output, returning the plain value if this is one.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Output::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Captures the output as plain data.
    #[must_use]
    pub fn export(&self) -> OutputSnapshot {
        match self {
            Output::Value(value) => OutputSnapshot::Value(value.clone()),
            Output::Turn(turn) => OutputSnapshot::Turn(Box::new(turn.export())),
            Output::Context(item) => OutputSnapshot::Context(item.clone()),
        }
    }

    /// Rebuilds an output from a snapshot.
    ///
    /// # Errors
    ///
    /// Fails if a nested turn cannot be imported.
    pub fn import(registry: &Registry, snapshot: OutputSnapshot) -> Result<Self, Error> {
        Ok(match snapshot {
            OutputSnapshot::Value(value) => Output::Value(value),
            OutputSnapshot::Turn(turn) => Output::Turn(Turn::import(registry, *turn)?),
            OutputSnapshot::Context(item) => Output::Context(item),
        })
    }
}

impl PartialEq for Output {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Output::Value(a), Output::Value(b)) => a == b,
            (Output::Turn(a), Output::Turn(b)) => a.ptr_eq(b),
            (Output::Context(a), Output::Context(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Value(value)
    }
}

impl From<Turn> for Output {
    fn from(turn: Turn) -> Self {
        Output::Turn(turn)
    }
}

impl From<ContextItem> for Output {
    fn from(item: ContextItem) -> Self {
        Output::Context(item)
    }
}

/// Everything one tool invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutput {
    /// The result of a returning tool.
    Single(Output),
    /// The values of a yielding tool, possibly partial.
    Stream(Vec<Output>),
}

impl TurnOutput {
    /// The produced values in order.
    #[must_use]
    pub fn values(&self) -> &[Output] {
        match self {
            TurnOutput::Single(output) => core::slice::from_ref(output),
            TurnOutput::Stream(outputs) => outputs,
        }
    }

    /// Captures the output as plain data.
    #[must_use]
    pub fn export(&self) -> TurnOutputSnapshot {
        match self {
            TurnOutput::Single(output) => TurnOutputSnapshot::Single(output.export()),
            TurnOutput::Stream(outputs) => {
                TurnOutputSnapshot::Stream(outputs.iter().map(Output::export).collect())
            }
        }
    }

    /// Rebuilds an output from a snapshot.
    ///
    /// # Errors
    ///
    /// Fails if a nested turn cannot be imported.
    pub fn import(registry: &Registry, snapshot: TurnOutputSnapshot) -> Result<Self, Error> {
        Ok(match snapshot {
            TurnOutputSnapshot::Single(output) => {
                TurnOutput::Single(Output::import(registry, output)?)
            }
            TurnOutputSnapshot::Stream(outputs) => TurnOutput::Stream(
                outputs
                    .into_iter()
                    .map(|output| Output::import(registry, output))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// Serializable form of [`Output`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OutputSnapshot {
    /// A plain value.
    Value(Value),
    /// A nested turn.
    Turn(Box<TurnSnapshot>),
    /// A context item.
    Context(ContextItem),
}

/// Serializable form of [`TurnOutput`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TurnOutputSnapshot {
    /// The result of a returning tool.
    Single(OutputSnapshot),
    /// The values of a yielding tool.
    Stream(Vec<OutputSnapshot>),
}
