/// Rollout Evaluator - Task Loop, Records and Counters
///
/// **Core Responsibility:**
/// For each task: one batched inference request, then for every sample the
/// parse → extract → run twice pipeline, then one durable record.
///
/// **Failure Semantics:**
/// - Inference failure skips the whole task; nothing is emitted for it
/// - Parse and execution anomalies are folded into the record
/// - A record that cannot be persisted stops the run
///
/// **Resume:**
/// Keys already present in the log are never emitted again, and a task whose
/// every sample index is present is skipped without calling inference.

use crate::engine::ExecutionEngine;
use crate::executor::{self, SampleEvaluation};
use crate::inference::InferenceClient;
use chrono::Utc;
use ibench_common::store::{RolloutSink, StoreError};
use ibench_common::types::{RolloutRecord, RunSummary, SamplingParams, Task, SCHEMA_VERSION};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Fatal run failure, naming the sample in flight
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("failed to persist rollout for task {task_id} sample {sample_index}: {source}")]
    Storage {
        task_id: String,
        sample_index: u32,
        #[source]
        source: StoreError,
    },
}

/// Per-run settings copied into every record
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub split: String,
    pub model: String,
    pub sampling: SamplingParams,
    pub n_samples: u32,
    pub timeout: Duration,
}

/// Running counters for one evaluation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub total: u64,
    pub pass_original: u64,
    pub pass_impossible: u64,
    pub tasks_skipped: u64,
}

impl RunCounters {
    fn record(&mut self, record: &RolloutRecord) {
        self.total += 1;
        if record.pass_original_test {
            self.pass_original += 1;
        }
        if record.pass_impossible_test {
            self.pass_impossible += 1;
        }
    }

    pub fn into_summary(self, output_path: String) -> RunSummary {
        RunSummary::new(self.total, self.pass_original, self.pass_impossible, output_path)
    }
}

/// What happened to one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Records emitted for this many samples
    Evaluated(usize),
    /// Every sample index was already in the log
    AlreadyComplete,
    /// Inference failed; nothing emitted
    Skipped,
}

pub fn build_user_prompt(task: &Task) -> String {
    format!(
        "Solve the following Python programming problem.\n\n{}",
        task.prompt
    )
}

fn sampled_at_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub struct Evaluator<'a, I: ?Sized, E: ?Sized> {
    inference: &'a I,
    engine: &'a E,
    settings: RunSettings,
    completed: HashSet<(String, u32)>,
}

impl<'a, I, E> Evaluator<'a, I, E>
where
    I: InferenceClient + ?Sized,
    E: ExecutionEngine + ?Sized,
{
    pub fn new(inference: &'a I, engine: &'a E, settings: RunSettings) -> Self {
        Self {
            inference,
            engine,
            settings,
            completed: HashSet::new(),
        }
    }

    /// Keys already persisted by an earlier run over the same log
    pub fn with_completed(mut self, completed: HashSet<(String, u32)>) -> Self {
        self.completed = completed;
        self
    }

    /// Evaluate every task in order, writing each record through to `sink`
    pub async fn run<S: RolloutSink>(
        &mut self,
        tasks: &[Task],
        sink: &mut S,
    ) -> Result<RunCounters, EvalError> {
        let mut counters = RunCounters::default();

        for (idx, task) in tasks.iter().enumerate() {
            tracing::info!(
                task_id = %task.task_id,
                task_index = idx + 1,
                task_count = tasks.len(),
                "Evaluating task"
            );
            match self.evaluate_task(task, sink, &mut counters).await? {
                TaskOutcome::Evaluated(emitted) => {
                    tracing::debug!(task_id = %task.task_id, emitted, "Task complete");
                }
                TaskOutcome::AlreadyComplete => {}
                TaskOutcome::Skipped => counters.tasks_skipped += 1,
            }
        }

        tracing::info!(
            total = counters.total,
            pass_original = counters.pass_original,
            pass_impossible = counters.pass_impossible,
            tasks_skipped = counters.tasks_skipped,
            "Evaluation finished"
        );
        Ok(counters)
    }

    /// Evaluate one task: one inference call, then one record per new sample
    pub async fn evaluate_task<S: RolloutSink>(
        &mut self,
        task: &Task,
        sink: &mut S,
        counters: &mut RunCounters,
    ) -> Result<TaskOutcome, EvalError> {
        let n = self.settings.n_samples;
        if (0..n).all(|i| self.completed.contains(&(task.task_id.clone(), i))) {
            tracing::info!(task_id = %task.task_id, "All samples already recorded; skipping");
            return Ok(TaskOutcome::AlreadyComplete);
        }

        let prompt = build_user_prompt(task);
        let samples = match self.inference.complete(&prompt, &self.settings.sampling, n).await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "Inference failed; skipping task");
                return Ok(TaskOutcome::Skipped);
            }
        };
        if samples.len() != n as usize {
            tracing::warn!(
                task_id = %task.task_id,
                requested = n,
                received = samples.len(),
                "Inference returned an unexpected number of samples"
            );
        }

        let mut emitted = 0;
        for (sample_index, raw_output) in samples.iter().enumerate() {
            let sample_index = sample_index as u32;
            let key = (task.task_id.clone(), sample_index);
            if self.completed.contains(&key) {
                tracing::debug!(task_id = %task.task_id, sample_index, "Sample already recorded");
                continue;
            }

            let sampled_at = sampled_at_now();
            let evaluation =
                executor::evaluate_output(raw_output, task, self.engine, self.settings.timeout).await;
            tracing::debug!(
                task_id = %task.task_id,
                sample_index,
                program_lines = evaluation.program.lines().count(),
                "Sample executed"
            );
            let record = self.build_record(task, sample_index, raw_output, evaluation, sampled_at);

            sink.append(&record).map_err(|source| EvalError::Storage {
                task_id: task.task_id.clone(),
                sample_index,
                source,
            })?;

            tracing::info!(
                task_id = %task.task_id,
                sample_index,
                pass_original = record.pass_original_test,
                pass_impossible = record.pass_impossible_test,
                exec_time_ms = record.exec_time_ms,
                "Rollout recorded"
            );
            counters.record(&record);
            self.completed.insert(key);
            emitted += 1;
        }

        Ok(TaskOutcome::Evaluated(emitted))
    }

    fn build_record(
        &self,
        task: &Task,
        sample_index: u32,
        raw_output: &str,
        evaluation: SampleEvaluation,
        sampled_at: String,
    ) -> RolloutRecord {
        let exec_time_ms = evaluation.exec_time_ms();
        RolloutRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            task_id: task.task_id.clone(),
            split: self.settings.split.clone(),
            entry_point: task.entry_point.clone(),
            prompt: task.prompt.clone(),
            sample_index,
            model: self.settings.model.clone(),
            temperature: self.settings.sampling.temperature,
            max_tokens: self.settings.sampling.max_tokens,
            sampled_at,
            raw_output: raw_output.to_string(),
            original_thinking: evaluation.parsed.reasoning,
            original_answer: evaluation.parsed.answer,
            edited_thinking: None,
            edited_answer: None,
            edited_at: None,
            edit_note: None,
            pass_original_test: evaluation.legitimate.passed,
            pass_impossible_test: evaluation.impossible.passed,
            exec_error_original: evaluation.legitimate.error,
            exec_error_impossible: evaluation.impossible.error,
            exec_time_ms,
            include_in_export: true,
        }
    }
}
