//! Instruction templates and stage-output references.
//!
//! Two placeholder forms are recognised:
//!
//! - `{param}`: a request parameter, substituted when the stage is built
//! - `{stage:<id>}` or `{stage:<id>/<json-pointer>}`: the output of an
//!   earlier stage, substituted when the stage is dispatched
//!
//! Templates are parsed once into segments, so text substituted from a request
//! or an earlier output is never re-scanned for placeholders.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigurationError;
use crate::stage::StageParams;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\{(?:stage:(?P<stage>[A-Za-z0-9_\-]+)(?P<pointer>/[^{}]*)?|(?P<param>[A-Za-z_][A-Za-z0-9_]*))\}",
        )
        .expect("placeholder pattern is valid")
    })
}

/// Reference to an earlier stage's output, optionally narrowed by an RFC 6901
/// JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRef {
    pub stage: String,
    pub pointer: Option<String>,
}

impl StageRef {
    pub fn whole(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            pointer: None,
        }
    }

    pub fn field(stage: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            pointer: Some(pointer.into()),
        }
    }
}

impl std::fmt::Display for StageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pointer {
            Some(p) => write!(f, "{}{}", self.stage, p),
            None => write!(f, "{}", self.stage),
        }
    }
}

/// Outputs of stages that have reached `Succeeded`, keyed by stage id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutputs {
    outputs: BTreeMap<String, Value>,
}

impl StageOutputs {
    pub fn insert(&mut self, stage: impl Into<String>, output: Value) {
        self.outputs.insert(stage.into(), output);
    }

    pub fn get(&self, stage: &str) -> Option<&Value> {
        self.outputs.get(stage)
    }

    /// Resolve `reference` on behalf of `requester`.
    ///
    /// Fails with `UnresolvedDependency` when the referenced stage has not
    /// succeeded or the pointer does not exist in its output.
    pub fn resolve(&self, requester: &str, reference: &StageRef) -> Result<&Value, ConfigurationError> {
        let unresolved = || ConfigurationError::UnresolvedDependency {
            stage: requester.to_string(),
            depends_on: reference.to_string(),
        };
        let output = self.outputs.get(&reference.stage).ok_or_else(unresolved)?;
        match &reference.pointer {
            None => Ok(output),
            Some(pointer) => output.pointer(pointer).ok_or_else(unresolved),
        }
    }
}

/// Render a value into instruction text. Strings are inserted verbatim,
/// everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "segment", content = "value", rename_all = "snake_case")]
enum Segment {
    Literal(String),
    Param(String),
    Stage(StageRef),
}

/// A parsed instruction template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionTemplate {
    segments: Vec<Segment>,
}

impl InstructionTemplate {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder_re().captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            if let Some(stage) = caps.name("stage") {
                segments.push(Segment::Stage(StageRef {
                    stage: stage.as_str().to_string(),
                    pointer: caps.name("pointer").map(|p| p.as_str().to_string()),
                }));
            } else if let Some(param) = caps.name("param") {
                segments.push(Segment::Param(param.as_str().to_string()));
            }
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }
        Self { segments }
    }

    /// Request parameters named by the template, in order of appearance.
    pub fn params(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(p) => Some(p.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Stage outputs referenced by the template, in order of appearance.
    pub fn stage_refs(&self) -> Vec<&StageRef> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Stage(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// Substitute every request placeholder, leaving stage references intact.
    pub fn bind_params(&self, params: &StageParams) -> Result<Self, ConfigurationError> {
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Param(name) => params
                    .require(name)
                    .map(|v| Segment::Literal(render_value(v))),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Produce final text, resolving stage references against `outputs`.
    ///
    /// Request placeholders must already be bound; a leftover one is reported
    /// as `MissingParameter`.
    pub fn render(&self, requester: &str, outputs: &StageOutputs) -> Result<String, ConfigurationError> {
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => text.push_str(s),
                Segment::Stage(reference) => {
                    text.push_str(&render_value(outputs.resolve(requester, reference)?))
                }
                Segment::Param(name) => {
                    return Err(ConfigurationError::MissingParameter {
                        param: name.clone(),
                    })
                }
            }
        }
        Ok(text)
    }
}
