//! The scan pipeline: enumerate, parse and match each file, then aggregate.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use globset::GlobSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{dedup, Aggregator};
use crate::candidate::{AgentCandidate, Candidate};
use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};
use crate::framework::FrameworkMatcher;
use crate::messages::MessageMatcher;
use crate::source::SourceUnit;
use crate::visit::{Matcher, Walker};
use crate::walk::{build_ignore_set, collect_source_files, display_path};

/// Counters for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub prompt_candidates: usize,
    pub framework_candidates: usize,
    pub duplicates_dropped: usize,
}

/// A file that was enumerated but contributed nothing because it could not
/// be read or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    /// De-duplicated agents in discovery order.
    pub agents: Vec<AgentCandidate>,
    pub stats: ScanStats,
    pub skipped: Vec<SkippedFile>,
}

/// Result of scanning a single file.
enum FileOutcome {
    Scanned(Vec<Candidate>),
    Skipped(SkippedFile),
}

pub struct Scanner {
    config: ScanConfig,
    ignore: Option<GlobSet>,
}

impl Scanner {
    /// Validates the configuration and compiles the ignore globs up front so
    /// that a bad config fails before any file is touched.
    pub fn new(config: ScanConfig) -> ScanResult<Self> {
        config.validate()?;
        let ignore = build_ignore_set(&config.ignore_globs)?;
        tree_sitter::Parser::new().set_language(&tree_sitter_python::LANGUAGE.into())?;
        Ok(Self { config, ignore })
    }

    /// Scans every source file under `root` (or `root` itself when it is a
    /// file). Output order is deterministic: files in sorted path order,
    /// candidates within a file in traversal order.
    pub fn scan(&self, root: &Path) -> ScanResult<ScanReport> {
        let started = Instant::now();
        let files = collect_source_files(root, &self.config, self.ignore.as_ref())?;
        info!(root = %root.display(), files = files.len(), "scan started");

        let outcomes = files
            .par_iter()
            .map(|path| {
                let rel = display_path(root, path);
                let result = isolate_panics(&rel, || self.scan_file(path, &rel));
                file_outcome(rel, result)
            })
            .collect::<ScanResult<Vec<FileOutcome>>>()?;

        let report = self.fold(outcomes);
        info!(
            agents = report.agents.len(),
            scanned = report.stats.files_scanned,
            skipped = report.stats.files_skipped,
            duplicates = report.stats.duplicates_dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan finished"
        );
        Ok(report)
    }

    /// Scans one in-memory source text as if it were a file named `path`.
    pub fn scan_source(&self, path: &str, text: &str) -> ScanResult<Vec<AgentCandidate>> {
        let candidates = self.match_source(path, text)?;
        Ok(dedup(candidates, self.config.dedup_prefix_chars))
    }

    fn scan_file(&self, path: &Path, rel: &str) -> ScanResult<Vec<Candidate>> {
        let size = std::fs::metadata(path)
            .map_err(|source| ScanError::Read {
                path: rel.to_string(),
                source,
            })?
            .len();
        if size > self.config.max_file_bytes {
            return Err(ScanError::TooLarge {
                path: rel.to_string(),
                size,
                limit: self.config.max_file_bytes,
            });
        }
        let bytes = std::fs::read(path).map_err(|source| ScanError::Read {
            path: rel.to_string(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);
        self.match_source(rel, &text)
    }

    fn match_source(&self, path: &str, text: &str) -> ScanResult<Vec<Candidate>> {
        let unit = SourceUnit::parse(path, text)?;
        let mut messages = MessageMatcher::from_config(&self.config);
        let mut frameworks = FrameworkMatcher::from_config(&self.config);
        let matchers: Vec<&mut dyn Matcher> = vec![&mut frameworks, &mut messages];
        Ok(Walker::new(unit.path.as_str(), matchers).walk_module(&unit.module))
    }

    fn fold(&self, outcomes: Vec<FileOutcome>) -> ScanReport {
        let mut agg = Aggregator::new(self.config.dedup_prefix_chars);
        let mut stats = ScanStats::default();
        let mut skipped = Vec::new();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Scanned(candidates) => {
                    stats.files_scanned += 1;
                    agg.extend(candidates);
                }
                FileOutcome::Skipped(file) => {
                    stats.files_skipped += 1;
                    skipped.push(file);
                }
            }
        }
        stats.prompt_candidates = agg.prompt_candidates();
        stats.framework_candidates = agg.framework_candidates();
        stats.duplicates_dropped = agg.duplicates_dropped();
        ScanReport {
            agents: agg.finish(),
            stats,
            skipped,
        }
    }
}

/// Runs one file's scan so that a panic inside it only costs that file.
fn isolate_panics(
    rel: &str,
    scan: impl FnOnce() -> ScanResult<Vec<Candidate>>,
) -> Result<ScanResult<Vec<Candidate>>, SkippedFile> {
    panic::catch_unwind(AssertUnwindSafe(scan)).map_err(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!(file = %rel, %detail, "panic while scanning file");
        SkippedFile {
            path: rel.to_string(),
            reason: format!("panicked while scanning: {detail}"),
        }
    })
}

/// File-level errors become skipped files; anything else aborts the scan.
fn file_outcome(
    rel: String,
    result: Result<ScanResult<Vec<Candidate>>, SkippedFile>,
) -> ScanResult<FileOutcome> {
    match result {
        Ok(Ok(candidates)) => {
            debug!(file = %rel, candidates = candidates.len(), "scanned");
            Ok(FileOutcome::Scanned(candidates))
        }
        Ok(Err(err)) if err.is_file_level() => {
            debug!(file = %rel, error = %err, "skipped");
            Ok(FileOutcome::Skipped(SkippedFile {
                path: rel,
                reason: err.to_string(),
            }))
        }
        Ok(Err(err)) => Err(err),
        Err(skipped) => Ok(FileOutcome::Skipped(skipped)),
    }
}
