use crate::resolve::ArgumentMap;
use crate::resources::Scripts;
use serde::Serialize;

/// Launcher conventions for the generated job submission line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandStyle {
    pub launcher: String,
    pub queue: String,
    pub tool: String,
    pub job_prefix: String,
}

impl Default for CommandStyle {
    fn default() -> Self {
        Self {
            launcher: "grun.py".to_string(),
            queue: "dragen.q".to_string(),
            tool: "dragen".to_string(),
            job_prefix: "dragen".to_string(),
        }
    }
}

/// `--k1 v1 --k2 v2 ...` in mapping order.
pub fn argument_string(arguments: &ArgumentMap) -> String {
    arguments
        .iter()
        .map(|(k, v)| format!("--{} {}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `<launcher> -n <job>[-<stage>] -L logs -q <queue> -c '<pre>\n<tool> args\n<post>'`
pub fn build_command(
    style: &CommandStyle,
    arguments: &ArgumentMap,
    sample_name: &str,
    stage: Option<&str>,
    scripts: Option<&Scripts>,
) -> String {
    let job_name = match stage {
        Some(s) if !s.is_empty() => format!("{}-{}-{}", style.job_prefix, sample_name, s),
        _ => format!("{}-{}", style.job_prefix, sample_name),
    };
    let invocation = format!("{} {}", style.tool, argument_string(arguments));
    let body = match scripts {
        Some(s) => format!("{}\n{}\n{}", s.pre, invocation, s.post),
        None => invocation,
    };
    format!(
        "{} -n {} -L logs -q {} -c '{}'",
        style.launcher, job_name, style.queue, body
    )
}
