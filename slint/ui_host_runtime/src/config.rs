use std::path::Path;
use std::time::Duration;

const DEFAULT_SANDBOX_CMD: &str = "preview-sandbox";
const DEFAULT_GENERATE_URL: &str = "http://127.0.0.1:3000/api/generate";
const DEFAULT_GENERATE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SURFACE_REFRESH_MS: u64 = 1_000;
const DEFAULT_COMMAND_QUEUE_CAP: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewConfig {
    /// Program followed by its arguments.
    pub sandbox_command: Vec<String>,
    pub generate_url: String,
    pub generate_timeout: Duration,
    pub surface_refresh: Duration,
    pub command_queue_cap: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            sandbox_command: vec![default_sandbox_program()],
            generate_url: DEFAULT_GENERATE_URL.to_string(),
            generate_timeout: Duration::from_secs(DEFAULT_GENERATE_TIMEOUT_SECS),
            surface_refresh: Duration::from_millis(DEFAULT_SURFACE_REFRESH_MS),
            command_queue_cap: DEFAULT_COMMAND_QUEUE_CAP,
        }
    }
}

impl PreviewConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`; unset, unparsable or zero values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let sandbox_command = lookup("PREVIEW_SANDBOX_CMD")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty())
            .unwrap_or(defaults.sandbox_command);

        let generate_url = lookup("PREVIEW_GENERATE_URL")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or(defaults.generate_url);

        let generate_timeout = parse_positive::<u64>(&lookup, "PREVIEW_GENERATE_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.generate_timeout);

        let surface_refresh = parse_positive::<u64>(&lookup, "PREVIEW_SURFACE_REFRESH_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.surface_refresh);

        let command_queue_cap = parse_positive::<usize>(&lookup, "PREVIEW_COMMAND_QUEUE_CAP")
            .unwrap_or(defaults.command_queue_cap);

        Self {
            sandbox_command,
            generate_url,
            generate_timeout,
            surface_refresh,
            command_queue_cap,
        }
    }
}

/// The renderer binary installed next to the running executable, falling
/// back to a `PATH` lookup.
fn default_sandbox_program() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| sibling(dir, DEFAULT_SANDBOX_CMD)))
        .filter(|candidate| candidate.is_file())
        .map(|candidate| candidate.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_SANDBOX_CMD.to_string())
}

fn sibling(dir: &Path, program: &str) -> std::path::PathBuf {
    dir.join(program).with_extension(std::env::consts::EXE_EXTENSION)
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}
