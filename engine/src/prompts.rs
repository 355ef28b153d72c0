//! Prompt builders for the three voting call sites, and parsing of the
//! numbered breakdowns the decomposition prompt asks for.

use std::sync::LazyLock;

use regex::Regex;

static LIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").expect("LIST_ITEM_RE regex should compile")
});

/// Marker line identifying a decomposition prompt.
pub const DECOMPOSE_MARKER: &str = "## Task breakdown";
/// Marker line identifying an atomic execution prompt.
pub const EXECUTE_MARKER: &str = "## Direct answer";
/// Marker line identifying a composition prompt.
pub const COMPOSE_MARKER: &str = "## Combine results";

/// Ask for the smallest reasonable ordered steps of `task`.
pub fn decomposition_prompt(task: &str, depth: usize) -> String {
    format!(
        "{DECOMPOSE_MARKER}\n\n\
         Break the following task into the smallest reasonable sequence of steps. \
         Each step must be self-contained and answerable on its own. \
         Respond ONLY with a numbered list, one step per line, like:\n\
         1. <step>\n2. <step>\n\n\
         Decomposition depth: {depth}\n\n\
         Task:\n{task}"
    )
}

/// Ask for the answer to an atomic task and nothing else.
pub fn execution_prompt(task: &str) -> String {
    format!(
        "{EXECUTE_MARKER}\n\n\
         Solve the following task. Respond with the final answer only, \
         with no explanation, hedging, or restatement of the task.\n\n\
         Task:\n{task}"
    )
}

/// Ask for a single answer to `task` built from its subtask results, which
/// are presented in the order supplied.
pub fn composition_prompt(task: &str, subtasks: &[String], results: &[String]) -> String {
    let mut prompt = format!(
        "{COMPOSE_MARKER}\n\n\
         The task below was split into steps, each already solved. Combine the \
         step results into the final answer for the task. Respond with the \
         final answer only.\n\n\
         Task:\n{task}\n\nStep results:\n"
    );
    for (i, result) in results.iter().enumerate() {
        let step = subtasks.get(i).map(String::as_str).unwrap_or("");
        prompt.push_str(&format!("{}. {}\n   => {}\n", i + 1, step, result.trim()));
    }
    prompt
}

/// Extract the steps of a numbered (or bulleted) list.
///
/// Lines that are not list items (preambles, blank lines) are skipped.
pub fn parse_numbered_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| LIST_ITEM_RE.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|step| !step.is_empty())
        .collect()
}

/// Canonical form of a step list: `"1. a\n2. b"`. This is what decomposition
/// rounds vote on, so two proposals agree only when every step matches.
pub fn render_numbered_list(steps: &[String]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}
