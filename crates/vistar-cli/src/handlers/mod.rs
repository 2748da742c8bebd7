//! Command handlers - extracted from main.rs for testability
//!
//! Each handler is async, takes the resolved [`CliConfig`](crate::CliConfig)
//! plus its parsed arguments, and returns what `main` needs for the exit
//! code.

pub mod accept;
pub mod baselines;
pub mod compare;
pub mod report;
pub mod run;

pub use accept::execute_accept;
pub use baselines::{execute_delete, execute_list};
pub use compare::execute_compare;
pub use report::execute_report;
pub use run::execute_run;

use crate::error::CliResult;
use std::path::Path;

/// Write `content` to `output`, or to stdout when no path is given
pub(crate) fn write_output(output: Option<&Path>, content: &str) -> CliResult<()> {
    match output {
        Some(path) => write_bytes(path, content.as_bytes()),
        None => {
            println!("{content}");
            Ok(())
        }
    }
}

/// Write `bytes` to `path`, creating parent directories
pub(crate) fn write_bytes(path: &Path, bytes: &[u8]) -> CliResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_write_output_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/nested/out.txt");
        write_output(Some(&path), "hello").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
    }
}
