//! Typed parameter grammar and command declaration.

mod dispatch;
mod execution;
mod parse;
mod template;

pub use dispatch::{execute, CommandHandler};
pub use execution::Execution;
pub use parse::parse;
pub use template::template;

use serde::{Deserialize, Serialize};

/// One parameter type in the grammar: `int|bool|string|real|parameters|*`
/// or `array(<element>)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamType {
    Int,
    Bool,
    String,
    Real,
    /// A nested dynamic mapping, passed through unparsed.
    Parameters,
    /// `*` — collects every name in the input not claimed by another
    /// declared parameter, into a sub-record.
    Star,
    Array(Box<ParamType>),
}

impl ParamType {
    /// Parses a type name as it appears in a declared [`Parameter`] or in
    /// `Ruleset.json`/`crontab.json` literals: `array(int)`, `bool`, `*`, ...
    pub fn parse_name(s: &str) -> Option<ParamType> {
        let s = s.trim();
        if s == "*" {
            return Some(ParamType::Star);
        }
        if let Some(inner) = s
            .strip_prefix("array(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return ParamType::parse_name(inner).map(|t| ParamType::Array(Box::new(t)));
        }
        match s {
            "int" => Some(ParamType::Int),
            "bool" => Some(ParamType::Bool),
            "string" => Some(ParamType::String),
            "real" => Some(ParamType::Real),
            "parameters" => Some(ParamType::Parameters),
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ParamType::Int => "int".into(),
            ParamType::Bool => "bool".into(),
            ParamType::String => "string".into(),
            ParamType::Real => "real".into(),
            ParamType::Parameters => "parameters".into(),
            ParamType::Star => "*".into(),
            ParamType::Array(inner) => format!("array({})", inner.name()),
        }
    }
}

/// A single declared parameter of a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ParamType,
    pub required: bool,
    /// Restricted set of acceptable values, if any. Not enforced by
    /// `parse` itself — plugins may consult it for validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<crate::value::Value>>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_: ParamType, required: bool) -> Self {
        Parameter {
            name: name.into(),
            type_,
            required,
            domain: None,
        }
    }
}

/// A declared command: `{target, name, parameters}`. `target` is a
/// plugin-type or the reserved identifier `"RIO"` for system commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub target: String,
    pub name: String,
    pub parameters: Vec<Parameter>,
}

impl Command {
    pub fn new(target: impl Into<String>, name: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Command {
            target: target.into(),
            name: name.into(),
            parameters,
        }
    }

    /// The command-table key used by the registry:
    /// `"<plugin-type>+<command-name>"`.
    pub fn table_key(&self) -> String {
        format!("{}+{}", self.target, self.name)
    }
}
