// CLI commands over rollout logs
use anyhow::{Context, Result};
use handlebars::{no_escape, Handlebars};
use ibench_common::store::{list_logs, read_rollouts};
use ibench_common::types::{RolloutRecord, RunSummary};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::Path;

const SFT_USER_TEMPLATE: &str = "Solve the following Python programming problem.\n\n{{prompt}}";
const SFT_ASSISTANT_TEMPLATE: &str = "<think>\n{{thinking}}\n</think>\n\n{{code}}";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SftMetadata {
    pub task_id: String,
    pub split: String,
    pub sample_index: u32,
    pub model: String,
    pub was_edited: bool,
    pub edited_at: Option<String>,
    pub pass_original_test: bool,
    pub pass_impossible_test: bool,
}

/// One supervised fine-tuning example
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SftRecord {
    pub messages: Vec<ChatMessage>,
    pub metadata: SftMetadata,
}

/// Renders rollouts into SFT chat examples
pub struct SftExporter {
    templates: Handlebars<'static>,
}

impl SftExporter {
    pub fn new() -> Result<Self> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        // Code and prompts are plain text, not HTML
        templates.register_escape_fn(no_escape);
        templates
            .register_template_string("user", SFT_USER_TEMPLATE)
            .context("Failed to register SFT user template")?;
        templates
            .register_template_string("assistant", SFT_ASSISTANT_TEMPLATE)
            .context("Failed to register SFT assistant template")?;
        Ok(Self { templates })
    }

    /// Convert one rollout, or `None` if it is filtered out
    ///
    /// Only rollouts that pass the legitimate tests and are still marked for
    /// export survive. Edited text wins over the original.
    pub fn to_sft(&self, rollout: &RolloutRecord) -> Result<Option<SftRecord>> {
        if !rollout.pass_original_test || !rollout.include_in_export {
            return Ok(None);
        }

        let user = self
            .templates
            .render("user", &json!({ "prompt": rollout.prompt }))
            .with_context(|| format!("Failed to render prompt for {}", rollout.task_id))?;
        let assistant = self
            .templates
            .render(
                "assistant",
                &json!({
                    "thinking": rollout.effective_thinking(),
                    "code": rollout.effective_answer(),
                }),
            )
            .with_context(|| format!("Failed to render answer for {}", rollout.task_id))?;

        Ok(Some(SftRecord {
            messages: vec![
                ChatMessage {
                    role: "user",
                    content: user,
                },
                ChatMessage {
                    role: "assistant",
                    content: assistant,
                },
            ],
            metadata: SftMetadata {
                task_id: rollout.task_id.clone(),
                split: rollout.split.clone(),
                sample_index: rollout.sample_index,
                model: rollout.model.clone(),
                was_edited: rollout.was_edited(),
                edited_at: rollout.edited_at.clone(),
                pass_original_test: rollout.pass_original_test,
                pass_impossible_test: rollout.pass_impossible_test,
            },
        }))
    }

    /// Read a rollout log and return the surviving SFT records
    pub fn export_file(&self, input: &Path) -> Result<Vec<SftRecord>> {
        let rollouts = read_rollouts(input)
            .with_context(|| format!("Failed to read rollouts from {}", input.display()))?;

        let mut records = Vec::new();
        for rollout in &rollouts {
            if let Some(sft) = self.to_sft(rollout)? {
                records.push(sft);
            }
        }
        Ok(records)
    }
}

/// Export a rollout log as SFT JSONL
pub async fn export(input: &str, output: &str) -> Result<()> {
    let exporter = SftExporter::new()?;
    let records = exporter.export_file(Path::new(input))?;

    let output_path = Path::new(output);
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    for record in &records {
        let line = serde_json::to_string(record).context("Failed to serialize SFT record")?;
        writeln!(file, "{}", line)?;
    }
    file.flush()?;

    println!("✅ Exported {} records → {}", records.len(), output_path.display());
    Ok(())
}

/// List rollout logs, newest first
pub async fn list_rollouts(dir: &str) -> Result<()> {
    let dir_path = Path::new(dir);
    if !dir_path.exists() {
        println!("No rollouts directory at {}.", dir);
        println!("\n💡 Run an evaluation with: ibench-eval --split one_off");
        return Ok(());
    }

    let logs = list_logs(dir_path)
        .with_context(|| format!("Failed to list rollouts in {}", dir))?;
    if logs.is_empty() {
        println!("No rollout files in {}.", dir);
        return Ok(());
    }

    println!("📋 Rollout files:\n");
    println!("{:<48} {:>10} {:>12}", "Name", "Rollouts", "Size (KB)");
    println!("{}", "─".repeat(72));
    for log in &logs {
        println!("{:<48} {:>10} {:>12.1}", log.name, log.lines, log.size_kb);
    }
    println!("\n✅ Total: {} file(s)", logs.len());
    Ok(())
}

/// Recompute the run summary over an entire log
pub fn summarize_file(input: &Path) -> Result<RunSummary> {
    let rollouts = read_rollouts(input)
        .with_context(|| format!("Failed to read rollouts from {}", input.display()))?;
    Ok(RunSummary::from_records(&rollouts, input.display().to_string()))
}

pub async fn summarize(input: &str) -> Result<()> {
    let summary = summarize_file(Path::new(input))?;

    println!("📊 Summary for {}\n", summary.output_path);
    println!("{:<24} {}", "Total rollouts", summary.total);
    println!("{:<24} {}", "Pass original tests", summary.pass_original);
    println!("{:<24} {}", "Pass impossible tests", summary.pass_impossible);
    println!("{:<24} {:.1}%", "Cheating rate", summary.cheating_rate * 100.0);
    Ok(())
}
