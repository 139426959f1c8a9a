//! Helpers shared by unit tests and the integration suites.

use std::io::Write;

use tempfile::NamedTempFile;

/// Installs a global subscriber filtered by `TEST_LOG` (e.g.
/// `TEST_LOG=recipe_harness=debug`). Safe to call from every test.
pub fn trace_init() {
    let levels = std::env::var("TEST_LOG").unwrap_or_else(|_| "error".to_owned());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(levels)
        .with_test_writer()
        .try_init();
}

/// Writes `contents` to a temporary recipe file that lives as long as the
/// returned handle.
pub fn recipe_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("recipe-")
        .suffix(".yaml")
        .tempfile()
        .expect("failed to create recipe file");
    file.write_all(contents.as_bytes())
        .expect("failed to write recipe file");
    file
}
