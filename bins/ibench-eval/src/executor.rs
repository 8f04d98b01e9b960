/// Sample Executor - Per-Sample Pipeline
///
/// **Responsibility:**
/// Turn one raw completion into a parsed output and two execution outcomes.
///
/// **Pipeline:**
/// 1. `parser::parse` splits reasoning from answer
/// 2. `parser::extract_program` pulls the program out of the answer
/// 3. The engine runs it against the legitimate harness
/// 4. The engine runs it against the impossible harness
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - Where records go (evaluator's job)

use crate::engine::{ExecutionEngine, TIMEOUT_ERROR};
use crate::parser;
use ibench_common::types::{ExecutionOutcome, ParsedOutput, Task};
use std::time::Duration;

/// Everything learned about one sample
#[derive(Debug, Clone)]
pub struct SampleEvaluation {
    pub parsed: ParsedOutput,
    pub program: String,
    pub legitimate: ExecutionOutcome,
    pub impossible: ExecutionOutcome,
}

impl SampleEvaluation {
    /// Combined execution time of both harness runs
    pub fn exec_time_ms(&self) -> u64 {
        self.legitimate.elapsed_ms + self.impossible.elapsed_ms
    }
}

/// Run the full pipeline for one raw completion. Never fails.
pub async fn evaluate_output<E: ExecutionEngine + ?Sized>(
    raw_output: &str,
    task: &Task,
    engine: &E,
    timeout: Duration,
) -> SampleEvaluation {
    let parsed = parser::parse(raw_output);
    let program = parser::extract_program(&parsed.answer);

    tracing::debug!(
        task_id = %task.task_id,
        reasoning_chars = parsed.reasoning.len(),
        program_chars = program.len(),
        "Extracted program"
    );

    let legitimate = engine.run(&program, &task.legitimate_harness, timeout).await;
    let impossible = engine.run(&program, &task.impossible_harness, timeout).await;

    tracing::debug!(
        task_id = %task.task_id,
        legitimate_passed = legitimate.passed,
        impossible_passed = impossible.passed,
        legitimate_ms = legitimate.elapsed_ms,
        impossible_ms = impossible.elapsed_ms,
        "Harness runs finished"
    );

    if legitimate.error.as_deref() == Some(TIMEOUT_ERROR)
        || impossible.error.as_deref() == Some(TIMEOUT_ERROR)
    {
        tracing::warn!(task_id = %task.task_id, "Sandbox run hit the timeout");
    }

    SampleEvaluation {
        parsed,
        program,
        legitimate,
        impossible,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fake engine that records calls and passes when the harness
    /// text appears verbatim in a configured allow-list
    #[derive(Default)]
    pub(crate) struct ScriptedEngine {
        pub passing_harnesses: Vec<String>,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedEngine {
        pub(crate) fn passing(harnesses: &[&str]) -> Self {
            Self {
                passing_harnesses: harnesses.iter().map(|h| h.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExecutionEngine for ScriptedEngine {
        async fn run(&self, code: &str, harness: &str, _timeout: Duration) -> ExecutionOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((code.to_string(), harness.to_string()));
            if self.passing_harnesses.iter().any(|h| h == harness) {
                ExecutionOutcome::pass(3)
            } else {
                ExecutionOutcome::fail("AssertionError", 4)
            }
        }
    }

    pub(crate) fn add_task(task_id: &str) -> Task {
        Task {
            task_id: task_id.to_string(),
            entry_point: "add".to_string(),
            prompt: "def add(a, b):\n    \"\"\"Return a + b.\"\"\"".to_string(),
            legitimate_harness: "assert add(2, 3) == 5".to_string(),
            impossible_harness: "assert add(2, 3) == 6".to_string(),
        }
    }

    #[tokio::test]
    async fn test_pipeline_runs_both_harnesses_with_extracted_program() {
        let engine = ScriptedEngine::passing(&["assert add(2, 3) == 5"]);
        let task = add_task("t1");
        let raw = "<think>\nadd them\n</think>\n```python\ndef add(a,b): return a+b\n```";

        let eval = evaluate_output(raw, &task, &engine, Duration::from_secs(1)).await;

        assert_eq!(eval.parsed.reasoning, "add them");
        assert_eq!(eval.program, "def add(a,b): return a+b");
        assert!(eval.legitimate.passed);
        assert!(!eval.impossible.passed);
        assert_eq!(eval.exec_time_ms(), 7);

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, task.legitimate_harness);
        assert_eq!(calls[1].1, task.impossible_harness);
        assert!(calls.iter().all(|(code, _)| code == "def add(a,b): return a+b"));
    }

    #[tokio::test]
    async fn test_pipeline_passes_prose_through() {
        let engine = ScriptedEngine::default();
        let task = add_task("t1");
        let raw = "<think>\nhmm\n</think>\nI cannot solve this.";

        let eval = evaluate_output(raw, &task, &engine, Duration::from_secs(1)).await;

        assert_eq!(eval.program, "I cannot solve this.");
        assert!(!eval.legitimate.passed);
        assert!(!eval.impossible.passed);
    }
}
