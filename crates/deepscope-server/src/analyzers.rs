// Heuristic analyzers
//
// Advisory collaborators: each produces an opaque annotation record that
// rides alongside the remote analysis. The core never interprets these
// payloads; they exist to give the remote (and the caller) cheap local
// signal. All file access goes through the SecureReader.

use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use deepscope_core::context::{Annotation, CodeLocation};
use deepscope_core::error::Result;
use deepscope_core::reader::SecureReader;

fn call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b([a-zA-Z_][a-zA-Z0-9_]*)\s*\(").expect("pattern compiles"))
}

fn loop_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(for|while|forEach|\.map\(|\.filter\()").expect("pattern compiles")
    })
}

fn query_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(query|select|find|fetch|execute)\w*\s*\(").expect("pattern compiles")
    })
}

fn annotation(source: &str, payload: Value) -> Annotation {
    Annotation {
        source: source.to_string(),
        at: Utc::now(),
        payload,
    }
}

// ============================================================================
// ExecutionTracer
// ============================================================================

/// Walks call-looking tokens forward from an entry point
pub struct ExecutionTracer {
    reader: Arc<SecureReader>,
}

impl ExecutionTracer {
    pub fn new(reader: Arc<SecureReader>) -> Self {
        Self { reader }
    }

    /// Collect up to `max_depth` call sites at or after the entry line
    pub async fn trace(&self, entry: &CodeLocation, max_depth: u32) -> Result<Annotation> {
        let content = self.reader.read(&entry.file).await?;
        let start = (entry.line.max(1) - 1) as usize;

        let mut calls = Vec::new();
        for (offset, line) in content.lines().skip(start).enumerate() {
            if calls.len() >= max_depth as usize {
                break;
            }
            for capture in call_pattern().captures_iter(line) {
                if calls.len() >= max_depth as usize {
                    break;
                }
                let callee = capture.get(1).map(|m| m.as_str()).unwrap_or_default();
                if matches!(callee, "if" | "for" | "while" | "match" | "switch" | "return") {
                    continue;
                }
                calls.push(json!({
                    "callee": callee,
                    "at": format!("{}:{}", entry.file, start + offset + 1),
                }));
            }
        }
        debug!(file = %entry.file, calls = calls.len(), "execution trace annotation");
        Ok(annotation(
            "execution_tracer",
            json!({
                "entry_point": format!("{}:{}", entry.file, entry.line),
                "call_sites": calls,
            }),
        ))
    }
}

// ============================================================================
// PerformanceModeler
// ============================================================================

/// Flags loop nesting and query-in-loop shapes
pub struct PerformanceModeler {
    reader: Arc<SecureReader>,
}

impl PerformanceModeler {
    pub fn new(reader: Arc<SecureReader>) -> Self {
        Self { reader }
    }

    pub async fn model(&self, entry: &CodeLocation, suspected: &[String]) -> Result<Annotation> {
        let content = self.reader.read(&entry.file).await?;

        let mut loop_lines = Vec::new();
        let mut query_in_loop = Vec::new();
        let mut loop_depth = 0usize;
        for (idx, line) in content.lines().enumerate() {
            if loop_pattern().is_match(line) {
                loop_depth += 1;
                loop_lines.push(idx + 1);
            }
            if loop_depth > 0 && query_pattern().is_match(line) {
                query_in_loop.push(idx + 1);
            }
            // Crude scope tracking: closing braces unwind loop depth.
            loop_depth = loop_depth.saturating_sub(line.matches('}').count());
        }

        Ok(annotation(
            "performance_modeler",
            json!({
                "file": entry.file,
                "loop_lines": loop_lines,
                "possible_query_in_loop_lines": query_in_loop,
                "suspected_issues": suspected,
            }),
        ))
    }
}

// ============================================================================
// BoundaryAnalyzer
// ============================================================================

/// Maps which scoped files mention which service names
pub struct BoundaryAnalyzer {
    reader: Arc<SecureReader>,
}

impl BoundaryAnalyzer {
    pub fn new(reader: Arc<SecureReader>) -> Self {
        Self { reader }
    }

    pub async fn analyze(&self, files: &[String], services: &[String]) -> Result<Annotation> {
        let mut touchpoints = Vec::new();
        for file in files {
            let content = self.reader.read(file).await?;
            for service in services {
                let mentions = content.matches(service.as_str()).count();
                if mentions > 0 {
                    touchpoints.push(json!({
                        "file": file,
                        "service": service,
                        "mentions": mentions,
                    }));
                }
            }
        }
        Ok(annotation(
            "boundary_analyzer",
            json!({
                "files": files,
                "services": services,
                "touchpoints": touchpoints,
            }),
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
