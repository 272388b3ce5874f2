use crate::error::{GeoflowError, Result};
use crate::process::check::{Action, CheckMoment, ProcessCheck};
use crate::process::{Executable, Process};
use crate::types::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Reference to a process added to a mapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub(crate) index: usize,
}

impl NodeHandle {
    pub fn input(self, name: &str) -> PortRef {
        PortRef {
            node: self.index,
            name: name.to_string(),
            direction: PortDirection::Input,
        }
    }

    pub fn output(self, name: &str) -> PortRef {
        PortRef {
            node: self.index,
            name: name.to_string(),
            direction: PortDirection::Output,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(index: usize) -> Self {
        Self { index }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum PortDirection {
    Input,
    Output,
}

/// A named input or output of one mapper node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub(crate) node: usize,
    pub(crate) name: String,
    pub(crate) direction: PortDirection,
}

struct Link {
    from_node: usize,
    from_output: String,
    to_node: usize,
    to_input: String,
}

struct InputAlias {
    node: usize,
    input: String,
    alias: String,
}

struct OutputAlias {
    node: usize,
    output: String,
    alias: String,
}

/// Composes processes by linking outputs to inputs and executes them in
/// dependency order.
///
/// A mapper is itself [`Executable`]: its inputs are the external
/// aliases (or free input names) of its nodes, its results the terminal
/// outputs nothing downstream consumed.
///
/// ```
/// use rusqlite_geoflow::{Executable, Process, ProcessMapper, Value, named_values};
///
/// let double = Process::builder()
///     .mandatory_input("n")
///     .output("doubled")
///     .body(|values| {
///         let n = i64::try_from(values[0].clone())?;
///         Ok(named_values([("doubled", Value::Integer(n * 2))]))
///     })
///     .build()?;
///
/// let mut mapper = ProcessMapper::new();
/// let first = mapper.add(double.new_instance());
/// let second = mapper.add(double.new_instance());
/// mapper.link(first.output("doubled"), second.input("n"))?;
///
/// mapper.execute(&named_values([("n", Value::Integer(3))]))?;
/// assert_eq!(mapper.results().get("doubled"), Some(&Value::Integer(12)));
/// # Ok::<(), rusqlite_geoflow::GeoflowError>(())
/// ```
pub struct ProcessMapper {
    id: Uuid,
    nodes: Vec<Process>,
    links: Vec<Link>,
    input_aliases: Vec<InputAlias>,
    output_aliases: Vec<OutputAlias>,
    checks: Vec<ProcessCheck>,
    results: HashMap<String, Value>,
}

impl Default for ProcessMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMapper {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            nodes: Vec::new(),
            links: Vec::new(),
            input_aliases: Vec::new(),
            output_aliases: Vec::new(),
            checks: Vec::new(),
            results: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add a process to the graph.
    pub fn add(&mut self, process: Process) -> NodeHandle {
        self.nodes.push(process);
        NodeHandle {
            index: self.nodes.len() - 1,
        }
    }

    /// Link one node's output into another node's input. An input can
    /// have exactly one source: a second link (or an alias on top of a
    /// link) is an error rather than a silent overwrite.
    pub fn link(&mut self, from: PortRef, to: PortRef) -> Result<()> {
        if from.direction != PortDirection::Output || to.direction != PortDirection::Input {
            return Err(GeoflowError::Message(
                "link goes from an output to an input".to_string(),
            ));
        }
        self.validate_port(&from)?;
        self.validate_port(&to)?;

        if self.input_source_taken(to.node, &to.name) {
            return Err(GeoflowError::DuplicateLink {
                target: self.port_label(&to),
            });
        }

        self.links.push(Link {
            from_node: from.node,
            from_output: from.name,
            to_node: to.node,
            to_input: to.name,
        });
        Ok(())
    }

    /// Give a node input an external alias. Several inputs may share
    /// one alias (one external value fans out); aliasing the same input
    /// twice, or aliasing a linked input, is an error.
    pub fn expose(&mut self, input: PortRef, alias: &str) -> Result<()> {
        if input.direction != PortDirection::Input {
            return Err(GeoflowError::Message(
                "only inputs can be exposed as external aliases".to_string(),
            ));
        }
        self.validate_port(&input)?;

        if self.input_source_taken(input.node, &input.name) {
            return Err(GeoflowError::DuplicateLink {
                target: self.port_label(&input),
            });
        }

        self.input_aliases.push(InputAlias {
            node: input.node,
            input: input.name,
            alias: alias.to_string(),
        });
        Ok(())
    }

    /// Publish a node output under an external alias in the mapper
    /// results. Claiming one alias from two outputs is an error.
    pub fn expose_output(&mut self, output: PortRef, alias: &str) -> Result<()> {
        if output.direction != PortDirection::Output {
            return Err(GeoflowError::Message(
                "only outputs can be exposed as result aliases".to_string(),
            ));
        }
        self.validate_port(&output)?;

        let taken = self.output_aliases.iter().any(|existing| {
            existing.alias == alias
                || (existing.node == output.node && existing.output == output.name)
        });
        if taken {
            return Err(GeoflowError::DuplicateLink {
                target: alias.to_string(),
            });
        }

        self.output_aliases.push(OutputAlias {
            node: output.node,
            output: output.name,
            alias: alias.to_string(),
        });
        Ok(())
    }

    /// Attach a pre/post-condition check to a node.
    pub fn add_check(&mut self, check: ProcessCheck) -> Result<()> {
        if check.node.index >= self.nodes.len() {
            return Err(GeoflowError::UnknownPort {
                process: format!("#{}", check.node.index),
                port: String::new(),
            });
        }
        if check.predicate.is_none() {
            return Err(GeoflowError::Message(
                "check has no predicate".to_string(),
            ));
        }
        for port in &check.ports {
            self.validate_port(port)?;
        }
        self.checks.push(check);
        Ok(())
    }

    fn validate_port(&self, port: &PortRef) -> Result<()> {
        let node = self.nodes.get(port.node).ok_or_else(|| {
            GeoflowError::UnknownPort {
                process: format!("#{}", port.node),
                port: port.name.clone(),
            }
        })?;

        let declared = match port.direction {
            PortDirection::Input => node.input(&port.name).is_some(),
            PortDirection::Output => node.output(&port.name).is_some(),
        };
        if !declared {
            return Err(GeoflowError::UnknownPort {
                process: node.label(),
                port: port.name.clone(),
            });
        }
        Ok(())
    }

    fn input_source_taken(&self, node: usize, input: &str) -> bool {
        self.links
            .iter()
            .any(|link| link.to_node == node && link.to_input == input)
            || self
                .input_aliases
                .iter()
                .any(|alias| alias.node == node && alias.input == input)
    }

    fn port_label(&self, port: &PortRef) -> String {
        format!("{}.{}", self.nodes[port.node].label(), port.name)
    }

    fn external_key<'a>(&'a self, node: usize, input: &'a str) -> &'a str {
        self.input_aliases
            .iter()
            .find(|alias| alias.node == node && alias.input == input)
            .map(|alias| alias.alias.as_str())
            .unwrap_or(input)
    }

    fn run_checks(
        &self,
        moment: CheckMoment,
        node: usize,
        pending: &[HashMap<String, Value>],
    ) -> Result<()> {
        for check in &self.checks {
            if check.node.index != node || check.moment != moment {
                continue;
            }

            let values = check
                .ports
                .iter()
                .map(|port| self.port_value(port, pending))
                .collect::<Vec<Value>>();

            if check.evaluate(&values) {
                tracing::debug!(process = %self.nodes[node].label(), "check passed");
                continue;
            }

            let message = check.message_or_default();
            match check.action {
                Action::Stop => {
                    return Err(GeoflowError::CheckFailed {
                        process: self.nodes[node].label(),
                        message,
                    });
                }
                Action::Continue => {
                    tracing::warn!(
                        process = %self.nodes[node].label(),
                        "check failed, continuing: {message}"
                    );
                }
            }
        }
        Ok(())
    }

    /// Current value behind a port: resolved input data before a node
    /// runs, produced output data after. Unresolved ports read as NULL.
    fn port_value(&self, port: &PortRef, pending: &[HashMap<String, Value>]) -> Value {
        match port.direction {
            PortDirection::Input => pending[port.node]
                .get(&port.name)
                .cloned()
                .or_else(|| {
                    self.nodes[port.node]
                        .input(&port.name)
                        .and_then(|spec| spec.default.clone())
                })
                .unwrap_or(Value::Null),
            PortDirection::Output => self.nodes[port.node]
                .results()
                .get(&port.name)
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

impl Executable for ProcessMapper {
    /// Run every node exactly once in dependency order.
    ///
    /// All free inputs are resolved from the external map before any
    /// node runs; a mandatory input with no source aborts up front.
    fn execute(&mut self, inputs: &HashMap<String, Value>) -> Result<()> {
        self.results.clear();
        let node_count = self.nodes.len();

        let linked: HashSet<(usize, &str)> = self
            .links
            .iter()
            .map(|link| (link.to_node, link.to_input.as_str()))
            .collect();

        // Resolve external data up front so a missing mandatory input
        // fails before anything runs.
        let mut pending: Vec<HashMap<String, Value>> = vec![HashMap::new(); node_count];
        for (node, process) in self.nodes.iter().enumerate() {
            for spec in process.inputs() {
                if linked.contains(&(node, spec.name.as_str())) {
                    continue;
                }
                let key = self.external_key(node, &spec.name);
                if let Some(value) = inputs.get(key) {
                    pending[node].insert(spec.name.clone(), value.clone());
                } else if spec.default.is_none() {
                    return Err(GeoflowError::MissingInput {
                        process: process.label(),
                        input: key.to_string(),
                    });
                }
            }
        }

        let mut ran = vec![false; node_count];
        for _ in 0..node_count {
            let runnable = (0..node_count).find(|&node| {
                !ran[node]
                    && self.nodes[node].inputs().iter().all(|spec| {
                        !linked.contains(&(node, spec.name.as_str()))
                            || pending[node].contains_key(&spec.name)
                    })
            });
            let Some(node) = runnable else {
                let stuck = (0..node_count)
                    .find(|&node| !ran[node])
                    .expect("some node did not run");
                return Err(GeoflowError::UnresolvedLink {
                    process: self.nodes[stuck].label(),
                });
            };

            self.run_checks(CheckMoment::Before, node, &pending)?;

            let node_inputs = pending[node].clone();
            let label = self.nodes[node].label();
            tracing::debug!(process = %label, "mapper executing node");
            if let Err(err) = self.nodes[node].execute(&node_inputs) {
                tracing::error!(process = %label, error = %err, "mapper aborted");
                return Err(err);
            }
            ran[node] = true;

            for link in &self.links {
                if link.from_node != node {
                    continue;
                }
                if let Some(value) = self.nodes[node].results().get(&link.from_output) {
                    pending[link.to_node].insert(link.to_input.clone(), value.clone());
                }
            }

            self.run_checks(CheckMoment::After, node, &pending)?;
        }

        // Terminal outputs (not consumed by any link) become the mapper
        // results under their alias or own name.
        let consumed: HashSet<(usize, &str)> = self
            .links
            .iter()
            .map(|link| (link.from_node, link.from_output.as_str()))
            .collect();
        let mut collected = HashMap::new();
        for (node, process) in self.nodes.iter().enumerate() {
            for spec in process.outputs() {
                if consumed.contains(&(node, spec.name.as_str())) {
                    continue;
                }
                let Some(value) = process.results().get(&spec.name) else {
                    continue;
                };
                let key = self
                    .output_aliases
                    .iter()
                    .find(|alias| alias.node == node && alias.output == spec.name)
                    .map(|alias| alias.alias.clone())
                    .unwrap_or_else(|| spec.name.clone());
                if collected.insert(key.clone(), value.clone()).is_some() {
                    tracing::warn!(
                        result = %key,
                        "terminal output name collision, keeping the last value"
                    );
                }
            }
        }
        self.results = collected;
        Ok(())
    }

    fn results(&self) -> &HashMap<String, Value> {
        &self.results
    }
}
