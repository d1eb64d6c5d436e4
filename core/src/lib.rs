//! Static discovery of LLM agent definitions in Python source trees.
//! Finds system prompts in chat-message literals and in framework agent
//! constructors, resolving string constants through nested scopes without
//! ever executing the scanned code.

pub mod aggregate;
pub mod candidate;
pub mod config;
pub mod error;
pub mod framework;
pub mod messages;
pub mod scanner;
pub mod scope;
pub mod source;
pub mod syntax;
pub mod visit;
pub mod walk;

use std::path::Path;

pub use candidate::{AgentCandidate, FrameworkTag, Value};
pub use config::{ArgSlot, FrameworkRule, ScanConfig};
pub use error::{ScanError, ScanResult};
pub use scanner::{ScanReport, ScanStats, Scanner, SkippedFile};

/// Scans `root` with the default configuration and returns the
/// de-duplicated agents in discovery order.
pub fn scan(root: &Path) -> ScanResult<Vec<AgentCandidate>> {
    let scanner = Scanner::new(ScanConfig::default())?;
    Ok(scanner.scan(root)?.agents)
}
