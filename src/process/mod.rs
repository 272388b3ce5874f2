mod check;
mod mapper;

pub use check::{Action, CheckMoment, ProcessCheck};
pub use mapper::{NodeHandle, PortRef, ProcessMapper};

use crate::error::{GeoflowError, Result};
use crate::types::{Value, ValueKind};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Declaration of one named process input.
#[derive(Clone, Debug)]
pub struct InputSpec {
    pub name: String,
    pub kind: Option<ValueKind>,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl InputSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: None,
            default: None,
            description: None,
        }
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// A default makes the input optional.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// Declaration of one named process output.
#[derive(Clone, Debug)]
pub struct OutputSpec {
    pub name: String,
    pub kind: Option<ValueKind>,
    pub description: Option<String>,
}

impl OutputSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            kind: None,
            description: None,
        }
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}

type ProcessBody = Arc<dyn Fn(&[Value]) -> Result<HashMap<String, Value>> + Send + Sync>;

/// Anything executable with named inputs and retrievable named results.
///
/// The static-dispatch seam shared by [`Process`] and
/// [`ProcessMapper`]: a mapper is itself a process to its callers.
pub trait Executable {
    fn execute(&mut self, inputs: &HashMap<String, Value>) -> Result<()>;
    fn results(&self) -> &HashMap<String, Value>;
}

/// A named unit of computation with declared inputs and outputs.
///
/// Built through [`Process::builder`]. Executing binds supplied input
/// values (falling back to declared defaults) positionally to the body
/// in declaration order and captures the returned map into `results`.
pub struct Process {
    id: Uuid,
    title: Option<String>,
    description: Option<String>,
    version: Option<String>,
    keywords: Vec<String>,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    body: ProcessBody,
    results: HashMap<String, Value>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl Process {
    pub fn builder() -> ProcessBuilder {
        ProcessBuilder::new()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputSpec] {
        &self.outputs
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|spec| spec.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|spec| spec.name == name)
    }

    /// Human-readable identifier used in errors and logs.
    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => self.id.to_string(),
        }
    }

    /// An independent instance with the same declarations and body, a
    /// fresh identifier and empty results. Execution state is never
    /// shared between instances.
    pub fn new_instance(&self) -> Process {
        Process {
            id: Uuid::new_v4(),
            title: self.title.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            keywords: self.keywords.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            body: Arc::clone(&self.body),
            results: HashMap::new(),
        }
    }

    /// Alias of [`Process::new_instance`].
    pub fn copy(&self) -> Process {
        self.new_instance()
    }

    fn resolve_inputs(&self, inputs: &HashMap<String, Value>) -> Result<Vec<Value>> {
        let mut resolved = Vec::with_capacity(self.inputs.len());
        for spec in &self.inputs {
            let value = match inputs.get(&spec.name) {
                Some(value) => value.clone(),
                None => match &spec.default {
                    Some(default) => default.clone(),
                    None => {
                        return Err(GeoflowError::MissingInput {
                            process: self.label(),
                            input: spec.name.clone(),
                        });
                    }
                },
            };

            if let Some(kind) = spec.kind {
                if !value.is_null() && value.kind() != kind {
                    return Err(GeoflowError::InputTypeMismatch {
                        process: self.label(),
                        input: spec.name.clone(),
                        expected: kind.as_str(),
                        actual: value.kind().as_str(),
                    });
                }
            }
            resolved.push(value);
        }
        Ok(resolved)
    }
}

impl Executable for Process {
    /// Run the body. Every declared input must resolve before anything
    /// executes; the returned map is filtered to declared outputs.
    fn execute(&mut self, inputs: &HashMap<String, Value>) -> Result<()> {
        let resolved = self.resolve_inputs(inputs)?;

        tracing::debug!(process = %self.label(), "executing process");
        let returned = (self.body)(&resolved).inspect_err(|err| {
            tracing::error!(process = %self.label(), error = %err, "process body failed");
        })?;

        self.results.clear();
        for (name, value) in returned {
            if self.output(&name).is_none() {
                tracing::warn!(
                    process = %self.label(),
                    output = %name,
                    "dropping undeclared output"
                );
                continue;
            }
            self.results.insert(name, value);
        }
        Ok(())
    }

    fn results(&self) -> &HashMap<String, Value> {
        &self.results
    }
}

/// Fluent builder for [`Process`].
#[derive(Default)]
pub struct ProcessBuilder {
    title: Option<String>,
    description: Option<String>,
    version: Option<String>,
    keywords: Vec<String>,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    body: Option<ProcessBody>,
}

impl ProcessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn input(mut self, spec: InputSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    /// Declare a mandatory input by name.
    pub fn mandatory_input<S: Into<String>>(self, name: S) -> Self {
        self.input(InputSpec::new(name))
    }

    /// Declare an optional input with its default value.
    pub fn optional_input<S: Into<String>>(self, name: S, default: Value) -> Self {
        self.input(InputSpec::new(name).with_default(default))
    }

    pub fn output_spec(mut self, spec: OutputSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Declare an output by name.
    pub fn output<S: Into<String>>(self, name: S) -> Self {
        self.output_spec(OutputSpec::new(name))
    }

    pub fn body<F>(mut self, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<HashMap<String, Value>> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    /// Freeze the declarations into an immutable process.
    pub fn build(self) -> Result<Process> {
        let body = self
            .body
            .ok_or_else(|| GeoflowError::Message("process has no body".to_string()))?;

        Ok(Process {
            id: Uuid::new_v4(),
            title: self.title,
            description: self.description,
            version: self.version,
            keywords: self.keywords,
            inputs: self.inputs,
            outputs: self.outputs,
            body,
            results: HashMap::new(),
        })
    }
}

/// An explicitly constructed store of process prototypes.
///
/// Registered processes are prototypes; [`ProcessRegistry::instance`]
/// hands out independent copies so concurrent uses never share results.
#[derive(Default)]
pub struct ProcessRegistry {
    prototypes: HashMap<Uuid, Process>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a prototype, keyed by its identifier.
    pub fn register(&mut self, process: Process) -> Uuid {
        let id = process.id();
        self.prototypes.insert(id, process);
        id
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.prototypes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// A fresh instance of the prototype with this identifier.
    pub fn instance(&self, id: Uuid) -> Option<Process> {
        self.prototypes.get(&id).map(Process::new_instance)
    }

    /// A fresh instance of the first prototype carrying this title.
    pub fn instance_by_title(&self, title: &str) -> Option<Process> {
        self.prototypes
            .values()
            .find(|process| process.title() == Some(title))
            .map(Process::new_instance)
    }
}

/// Build a name→value map from pairs; convenient inside process bodies.
pub fn named_values<I, K>(entries: I) -> HashMap<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries
        .into_iter()
        .map(|(name, value)| (name.into(), value))
        .collect()
}
