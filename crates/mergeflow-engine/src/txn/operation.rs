//! Transaction operations with paired execute/undo closures

use futures::future::BoxFuture;

/// Boxed async closure producing an operation result
pub type OperationFuture = BoxFuture<'static, anyhow::Result<serde_json::Value>>;
type OperationFn = Box<dyn Fn() -> OperationFuture + Send + Sync>;

/// One step of a transaction: a forward mutation and its compensating
/// reverse
///
/// `op_type`, `target`, and `params` are bookkeeping for observers and
/// logs; the engine only ever calls the two closures.
pub struct Operation {
    pub op_type: String,
    pub target: String,
    pub params: serde_json::Value,
    execute: OperationFn,
    undo: OperationFn,
}

impl Operation {
    pub fn new<E, EF, U, UF>(
        op_type: impl Into<String>,
        target: impl Into<String>,
        params: serde_json::Value,
        execute: E,
        undo: U,
    ) -> Self
    where
        E: Fn() -> EF + Send + Sync + 'static,
        EF: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
        U: Fn() -> UF + Send + Sync + 'static,
        UF: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            op_type: op_type.into(),
            target: target.into(),
            params,
            execute: Box::new(move || Box::pin(execute())),
            undo: Box::new(move || Box::pin(undo())),
        }
    }

    pub(crate) fn run_execute(&self) -> OperationFuture {
        (self.execute)()
    }

    pub(crate) fn run_undo(&self) -> OperationFuture {
        (self.undo)()
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("op_type", &self.op_type)
            .field("target", &self.target)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_and_undo_run_independently() {
        let op = Operation::new(
            "set",
            "counter",
            serde_json::json!({ "value": 1 }),
            || async { Ok(serde_json::json!("executed")) },
            || async { Ok(serde_json::json!("undone")) },
        );

        assert_eq!(op.run_execute().await.unwrap(), "executed");
        assert_eq!(op.run_undo().await.unwrap(), "undone");
    }

    #[test]
    fn test_debug_does_not_require_closures() {
        let op = Operation::new(
            "noop",
            "nothing",
            serde_json::Value::Null,
            || async { Ok(serde_json::Value::Null) },
            || async { Ok(serde_json::Value::Null) },
        );
        let rendered = format!("{op:?}");
        assert!(rendered.contains("noop"));
    }
}
