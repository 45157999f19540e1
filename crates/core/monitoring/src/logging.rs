//! A set of utilities to enable logging configuration using tracing_subscriber.

use std::{io::IsTerminal, sync::Once};

use tracing_subscriber::{EnvFilter, filter::LevelFilter};

static PG_CHILDREN_LOG_ENV_VAR: &str = "PG_CHILDREN_LOG";

/// Initializes a tracing subscriber for logging.
///
/// Workspace crates log at the level named by `PG_CHILDREN_LOG` (default: `info`); everything
/// else only logs errors. `RUST_LOG` directives take precedence for the crates they name.
pub fn init() {
    // Tests call this too, so only the first call installs the subscriber.
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, log_level) = env_filter_and_log_level();

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();

        tracing::debug!("log level: {}", log_level);
    });
}

/// List of crates in the workspace.
const WORKSPACE_CRATES: &[&str] = &[
    "monitoring",
    "pg_children",
    "pg_children_cli",
    "pg_children_config",
    "tempdb",
];

fn env_filter_and_log_level() -> (EnvFilter, String) {
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::ERROR.into())
        .parse_lossy(&directive_string);

    let log_level =
        std::env::var(PG_CHILDREN_LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());

    for crate_name in WORKSPACE_CRATES {
        // Skip crates RUST_LOG already has a directive for
        if directive_string.contains(&format!("{crate_name}=")) {
            continue;
        }
        match format!("{crate_name}={log_level}").parse() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(err) => {
                eprintln!("ignoring invalid {PG_CHILDREN_LOG_ENV_VAR} value '{log_level}': {err}");
                break;
            }
        }
    }

    (env_filter, log_level)
}

/// If this fails, just update the above `WORKSPACE_CRATES` to match reality.
#[test]
fn assert_workspace_crates() {
    use cargo_metadata::MetadataCommand;

    let cmd = MetadataCommand::new().exec().unwrap();
    let mut names: Vec<String> = cmd
        .workspace_packages()
        .into_iter()
        .map(|pkg| pkg.name.replace("-", "_"))
        .collect();
    names.sort();
    assert_eq!(names, WORKSPACE_CRATES);
}
