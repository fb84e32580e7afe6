//! Test-only helpers: scripted agents, event line builders, and a console
//! capture buffer.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use anyhow::{Result, anyhow};
use serde_json::json;

use crate::core::completion::COMPLETION_SENTINEL;
use crate::core::task::{
    InMemoryTaskStore, Task, TaskStatus, TaskStore, TaskUpdate, all_completed, select_next,
};
use crate::io::config::RalphConfig;
use crate::io::invoker::{AgentInvoker, Invocation, InvocationExit, InvokeRequest};

/// Default config with the cooldown disabled.
pub fn test_config() -> RalphConfig {
    RalphConfig {
        cooldown_secs: 0,
        ..RalphConfig::default()
    }
}

/// A stream-json assistant event carrying one text part.
pub fn assistant_line(text: &str) -> String {
    json!({
        "type": "assistant",
        "message": { "content": [{ "type": "text", "text": text }] }
    })
    .to_string()
}

/// A stream-json terminal result event.
pub fn result_line(text: &str) -> String {
    json!({ "type": "result", "subtype": "success", "result": text }).to_string()
}

pub fn task(id: &str, subject: &str, blocked_by: &[&str]) -> Task {
    Task {
        id: id.to_string(),
        subject: subject.to_string(),
        description: String::new(),
        status: TaskStatus::Pending,
        blocked_by: blocked_by.iter().map(|s| s.to_string()).collect(),
    }
}

/// Cloneable in-memory console.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One canned agent run.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Stream {
        lines: Vec<String>,
        exit: InvocationExit,
    },
    SpawnError(String),
}

impl ScriptedRun {
    /// A clean run whose only event is a result carrying `text`.
    pub fn result(text: &str) -> Self {
        Self::lines(vec![result_line(text)], 0)
    }

    pub fn lines(lines: Vec<String>, exit_code: i32) -> Self {
        let exit = if exit_code == 0 {
            InvocationExit::ok()
        } else {
            InvocationExit::failed(exit_code)
        };
        Self::Stream { lines, exit }
    }

    /// A run that exits with `exit_code` after `lines`, leaving `stderr` behind.
    pub fn failing(lines: Vec<String>, exit_code: i32, stderr: &str) -> Self {
        Self::Stream {
            lines,
            exit: InvocationExit {
                stderr_tail: stderr.to_string(),
                ..InvocationExit::failed(exit_code)
            },
        }
    }

    /// A run that was killed for exceeding its timeout after `lines`.
    pub fn timed_out(lines: Vec<String>) -> Self {
        Self::Stream {
            lines,
            exit: InvocationExit {
                code: None,
                success: false,
                timed_out: true,
                stderr_tail: String::new(),
            },
        }
    }

    pub fn spawn_error(message: &str) -> Self {
        Self::SpawnError(message.to_string())
    }
}

/// Invoker that replays scripted runs in order.
pub struct ScriptedInvoker {
    runs: RefCell<VecDeque<ScriptedRun>>,
    fallback: Option<ScriptedRun>,
    invocations: Cell<u32>,
    payloads: RefCell<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            fallback: None,
            invocations: Cell::new(0),
            payloads: RefCell::new(Vec::new()),
        }
    }

    /// Replays `run` for every invocation.
    pub fn repeating(run: ScriptedRun) -> Self {
        Self {
            fallback: Some(run),
            ..Self::new(Vec::new())
        }
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.get()
    }

    /// Payloads received, one per invocation.
    pub fn payloads(&self) -> Vec<String> {
        self.payloads.borrow().clone()
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke(&self, request: &InvokeRequest) -> Result<Box<dyn Invocation + '_>> {
        self.invocations.set(self.invocations.get() + 1);
        self.payloads.borrow_mut().push(request.payload.clone());
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted invoker exhausted"))?;
        match run {
            ScriptedRun::Stream { lines, exit } => Ok(Box::new(ScriptedInvocation {
                lines: lines.into(),
                exit,
            })),
            ScriptedRun::SpawnError(message) => Err(anyhow!(message)),
        }
    }
}

struct ScriptedInvocation {
    lines: VecDeque<String>,
    exit: InvocationExit,
}

impl Invocation for ScriptedInvocation {
    fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.pop_front())
    }

    fn finish(self: Box<Self>) -> Result<InvocationExit> {
        Ok(self.exit)
    }
}

/// Agent that honours the task selection protocol against an in-memory store.
///
/// Each invocation completes exactly one selectable task and emits the
/// completion sentinel once every task is completed.
pub struct TaskAgent {
    store: RefCell<InMemoryTaskStore>,
    invocations: Cell<u32>,
    completed: RefCell<Vec<String>>,
}

impl TaskAgent {
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        Ok(Self {
            store: RefCell::new(InMemoryTaskStore::with_tasks(tasks)?),
            invocations: Cell::new(0),
            completed: RefCell::new(Vec::new()),
        })
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.get()
    }

    /// Task ids in the order they were completed.
    pub fn completed(&self) -> Vec<String> {
        self.completed.borrow().clone()
    }

    pub fn tasks(&self) -> Result<Vec<Task>> {
        self.store.borrow().list()
    }

    fn work_one(&self) -> Result<Vec<String>> {
        let mut store = self.store.borrow_mut();
        let tasks = store.list()?;
        let Some(next) = select_next(&tasks) else {
            let summary = if all_completed(&tasks) {
                format!("All tasks completed.\n{COMPLETION_SENTINEL}")
            } else {
                "No selectable task; remaining work is blocked.".to_string()
            };
            return Ok(vec![result_line(&summary)]);
        };

        let id = next.id.clone();
        let subject = next.subject.clone();
        for status in [TaskStatus::InProgress, TaskStatus::Completed] {
            store.update(
                &id,
                TaskUpdate {
                    status: Some(status),
                    ..TaskUpdate::default()
                },
            )?;
        }
        self.completed.borrow_mut().push(id.clone());

        let note = format!("Completed task {id}: {subject}");
        let result = if all_completed(&store.list()?) {
            format!("{note}\n{COMPLETION_SENTINEL}")
        } else {
            note.clone()
        };
        Ok(vec![assistant_line(&note), result_line(&result)])
    }
}

impl AgentInvoker for TaskAgent {
    fn invoke(&self, _request: &InvokeRequest) -> Result<Box<dyn Invocation + '_>> {
        self.invocations.set(self.invocations.get() + 1);
        let lines = self.work_one()?;
        Ok(Box::new(ScriptedInvocation {
            lines: lines.into(),
            exit: InvocationExit::ok(),
        }))
    }
}
