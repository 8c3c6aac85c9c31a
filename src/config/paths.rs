//! Canonical paths for ccms state.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! | Path | Purpose |
//! |------|---------|
//! | `$CCMS_HOME/runs/<run-id>/` | Event log and review checkpoint per run |
//! | `$CCMS_HOME/review/tickets.jsonl` | Human review ticket log |
//! | `$CCMS_HOME/metrics.db` | Per-run metrics (SQLite) |
//! | config store | Global, tenant and item YAML layers |
//! | research dir | Research JSON per item |

use std::path::PathBuf;

use anyhow::Result;

/// Get the ccms home directory (~/.ccms)
pub fn ccms_home() -> Result<PathBuf> {
    Ok(super::config()?.home.clone())
}

/// Get the runs directory ($CCMS_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(ccms_home()?.join("runs"))
}

/// Root of the YAML config layers
pub fn config_store_dir() -> Result<PathBuf> {
    Ok(super::config()?.config_store.clone())
}

/// Root of the research files
pub fn research_dir() -> Result<PathBuf> {
    Ok(super::config()?.research.clone())
}

/// Review ticket log ($CCMS_HOME/review/tickets.jsonl)
pub fn review_log_path() -> Result<PathBuf> {
    Ok(ccms_home()?.join("review").join("tickets.jsonl"))
}

/// Metrics database ($CCMS_HOME/metrics.db)
pub fn metrics_db_path() -> Result<PathBuf> {
    Ok(ccms_home()?.join("metrics.db"))
}
