//! Prompt construction and output parsing for the pipeline stages.
//!
//! The classifier prompt constrains the model to the two-token vocabulary
//! `direct` / `multi_step`; anything else (refusals and prose included)
//! classifies as `direct`. The planner asks for a JSON array of step
//! strings and is parsed tolerantly: code fences and surrounding prose are
//! stripped before the array is read.

use crate::dag::Classification;

/// Builds the intent-classification prompt for the `router` role.
pub(crate) fn classifier_prompt(task: &str) -> String {
    format!(
        "You are a task triage classifier.\n\
         Task: \"{task}\"\n\
         Answer `direct` if a single model call can complete the task.\n\
         Answer `multi_step` if it must be planned as discrete steps first.\n\
         Reply with exactly one word: direct or multi_step."
    )
}

/// Interprets classifier output; unknown output defaults to `direct`.
pub(crate) fn parse_classification(raw: &str) -> Classification {
    let normalized = raw.trim().to_lowercase();
    if normalized.contains("multi_step")
        || normalized.contains("multi-step")
        || normalized.contains("multistep")
    {
        Classification::MultiStep
    } else {
        Classification::Direct
    }
}

/// Builds the planning prompt for the `reasoning` role.
pub(crate) fn planner_prompt(task: &str, context: &str, max_steps: usize) -> String {
    format!(
        "You are a lead software architect.\n\
         TASK: {task}\n\
         CONTEXT: {context}\n\n\
         Create a strictly sequential plan as a JSON array of at most {max_steps} short step strings.\n\
         Example: [\"Create the module\", \"Implement the core type\", \"Wire it into the API\"]\n\
         Return the JSON array only."
    )
}

/// Tolerant plan parse: strips code fences and surrounding prose, then
/// requires a JSON array of 1..=`max_steps` strings. `None` means the
/// pipeline should degrade to direct execution.
pub(crate) fn parse_plan(raw: &str, max_steps: usize) -> Option<Vec<String>> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let start = cleaned.find('[')?;
    let end = cleaned.rfind(']')?;
    if end <= start {
        return None;
    }
    let steps: Vec<String> = serde_json::from_str(&cleaned[start..=end]).ok()?;
    if steps.is_empty() || steps.len() > max_steps {
        return None;
    }
    Some(steps)
}

/// Builds the prompt for the direct (single-call) branch.
pub(crate) fn direct_prompt(task: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.is_empty() => format!("TASK: {task}\nCONTEXT: {context}"),
        _ => format!("TASK: {task}"),
    }
}

/// Builds the prompt for one plan step, carrying the accumulated output of
/// earlier steps.
pub(crate) fn step_prompt(step: &str, context: Option<&str>, previous: &[String]) -> String {
    let mut prompt = format!("GOAL: {step}\n");
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("CONTEXT: {context}\n"));
    }
    if !previous.is_empty() {
        prompt.push_str(&format!("PREVIOUS_OUTPUT:\n{}\n", previous.join("\n")));
    }
    prompt.push_str("Return only the requested output.");
    prompt
}

/// Formats the joined output of a multi-step run.
pub(crate) fn join_step_outputs(steps: &[String], outputs: &[String]) -> String {
    steps
        .iter()
        .zip(outputs)
        .enumerate()
        .map(|(i, (step, output))| format!("# --- Step {}: {step} ---\n{output}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}
