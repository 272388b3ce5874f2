use crate::process::mapper::{NodeHandle, PortRef};
use crate::types::Value;
use std::sync::Arc;

/// What happens when a check's predicate comes back false.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Abort the mapper run with a typed error.
    Stop,
    /// Log the configured message and keep walking the graph.
    Continue,
}

/// Whether the check runs before or after its process executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckMoment {
    Before,
    After,
}

pub(crate) enum CheckPredicate {
    /// Watched values must equal these literals, positionally.
    Equals(Vec<Value>),
    /// Arbitrary predicate over the watched values.
    Closure(Arc<dyn Fn(&[Value]) -> bool + Send + Sync>),
}

/// A guard attached to one process inside a mapper.
///
/// The check watches a set of ports (inputs before execution, outputs
/// after, or any already-resolved port) and evaluates a predicate over
/// their values. Example:
///
/// ```
/// use rusqlite_geoflow::{Action, ProcessCheck};
/// # use rusqlite_geoflow::ProcessMapper;
/// # let mut mapper = ProcessMapper::new();
/// # let node = mapper.add(
/// #     rusqlite_geoflow::Process::builder()
/// #         .mandatory_input("n")
/// #         .output("out")
/// #         .body(|values| {
/// #             Ok(rusqlite_geoflow::named_values([("out", values[0].clone())]))
/// #         })
/// #         .build()
/// #         .unwrap(),
/// # );
/// let check = ProcessCheck::before(node)
///     .watch(node.input("n"))
///     .with_predicate(|values| !values[0].is_null())
///     .on_fail(Action::Stop)
///     .with_message("n must be provided");
/// # mapper.add_check(check).unwrap();
/// ```
pub struct ProcessCheck {
    pub(crate) node: NodeHandle,
    pub(crate) moment: CheckMoment,
    pub(crate) ports: Vec<PortRef>,
    pub(crate) predicate: Option<CheckPredicate>,
    pub(crate) action: Action,
    pub(crate) message: Option<String>,
}

impl ProcessCheck {
    /// A check evaluated just before the node executes.
    pub fn before(node: NodeHandle) -> Self {
        Self::new(node, CheckMoment::Before)
    }

    /// A check evaluated right after the node executes.
    pub fn after(node: NodeHandle) -> Self {
        Self::new(node, CheckMoment::After)
    }

    fn new(node: NodeHandle, moment: CheckMoment) -> Self {
        Self {
            node,
            moment,
            ports: Vec::new(),
            predicate: None,
            action: Action::Stop,
            message: None,
        }
    }

    /// Add a port whose value the predicate receives, in watch order.
    pub fn watch(mut self, port: PortRef) -> Self {
        self.ports.push(port);
        self
    }

    /// Expect the watched values to equal these literals, positionally.
    pub fn expect_values<I>(mut self, expected: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.predicate = Some(CheckPredicate::Equals(expected.into_iter().collect()));
        self
    }

    /// Evaluate an arbitrary predicate over the watched values.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(CheckPredicate::Closure(Arc::new(predicate)));
        self
    }

    pub fn on_fail(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub(crate) fn evaluate(&self, values: &[Value]) -> bool {
        match &self.predicate {
            Some(CheckPredicate::Equals(expected)) => expected.as_slice() == values,
            Some(CheckPredicate::Closure(predicate)) => predicate(values),
            None => true,
        }
    }

    pub(crate) fn message_or_default(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => "check predicate evaluated to false".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, ProcessCheck};
    use crate::process::mapper::NodeHandle;
    use crate::types::Value;

    #[test]
    fn equality_predicate_compares_positionally() {
        let check = ProcessCheck::before(NodeHandle::for_tests(0))
            .expect_values([Value::Integer(1), Value::from("ok")]);

        assert!(check.evaluate(&[Value::Integer(1), Value::from("ok")]));
        assert!(!check.evaluate(&[Value::Integer(2), Value::from("ok")]));
        assert!(!check.evaluate(&[Value::Integer(1)]));
    }

    #[test]
    fn closure_predicate_sees_watched_values() {
        let check = ProcessCheck::after(NodeHandle::for_tests(0))
            .with_predicate(|values| values.iter().all(|value| !value.is_null()));

        assert!(check.evaluate(&[Value::Integer(1)]));
        assert!(!check.evaluate(&[Value::Integer(1), Value::Null]));
    }

    #[test]
    fn default_action_is_stop() {
        let check = ProcessCheck::before(NodeHandle::for_tests(0));
        assert_eq!(check.action, Action::Stop);

        let check = check.on_fail(Action::Continue);
        assert_eq!(check.action, Action::Continue);
    }
}
