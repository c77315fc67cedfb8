//! 模拟预演报告。
//!
//! [`Registry::simulate`](crate::Registry::simulate) 在模拟模式下执行一次操作：Handler 失败被吞掉，
//! 写操作不落入存储，事务总是回滚。报告列出每个 Handler 的执行状态，供调用方预先检查链路。

use crate::{
    context::{HandlerExecution, Outcome},
    operation::OperationKind,
};

/// 一次模拟执行的结果。
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationReport {
    pub kind: OperationKind,
    /// 链路产生的结果；出错时为 `None`。
    pub outcome: Option<Outcome>,
    pub executions: Vec<HandlerExecution>,
    /// 未被吞掉的错误（致命错误、授权或路径错误）。
    pub error: Option<String>,
}

impl SimulationReport {
    /// 所有已执行的 Handler 均成功。
    pub fn all_succeeded(&self) -> bool {
        self.error.is_none() && self.executions.iter().all(HandlerExecution::succeeded)
    }

    /// 执行失败的 Handler 执行记录。
    pub fn failures(&self) -> impl Iterator<Item = &HandlerExecution> {
        self.executions
            .iter()
            .filter(|execution| !execution.succeeded())
    }
}
