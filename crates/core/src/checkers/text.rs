//! In-process checker comparing normalized IR text.
//!
//! Both functions are cut out of their modules and normalized: debug metadata,
//! attribute group references and comments are dropped, and local value and
//! block names are renumbered by definition order. Patterns then remove more:
//!
//! - `kernel-prints`: calls to `printk` and the `dev_*` printing helpers.
//! - `dead-code`: basic blocks unreachable from the entry block.
//! - `control-flow-only`: everything except labels, terminators and callees.
//!
//! The functions are equal when the normalized texts match line for line.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use similar::{Algorithm, DiffTag};
use tracing::debug;

use super::cache::ModuleCache;
use crate::compare::{
    CheckOutcome, CheckRequest, CheckerError, EquivalenceChecker, IrFunction, Severity, Verdict,
};
use crate::patterns::Pattern;

/// Unchanged lines shown around each difference.
const DIFF_CONTEXT: usize = 2;

/// Time spent searching for a minimal diff before settling for a coarse one.
const DIFF_TIME_BUDGET: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct IrTextChecker {
    cache: Option<Arc<ModuleCache>>,
}

impl IrTextChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read modules through a shared cache.
    pub fn with_cache(cache: Arc<ModuleCache>) -> Self {
        Self { cache: Some(cache) }
    }

    fn module_text(&self, path: &Path) -> Result<Arc<str>, CheckerError> {
        let loaded = match &self.cache {
            Some(cache) => cache.load(path),
            None => std::fs::read_to_string(path).map(Arc::from),
        };
        loaded.map_err(|e| CheckerError::Io { path: path.to_path_buf(), message: e.to_string() })
    }

    fn function_lines(
        &self,
        function: &IrFunction,
        normalization: Normalization,
    ) -> Result<Option<Vec<String>>, CheckerError> {
        let text = self.module_text(&function.module)?;
        let mut lines = match extract_function(&text, &function.name) {
            Some(body) => normalize(&body, normalization),
            None => match extract_global(&text, &function.name) {
                Some(global) => vec![strip_line(global)],
                None => return Ok(None),
            },
        };
        // A sysctl handler is compared together with the variable it serves.
        if let Some(var) = function.glob_var.as_deref().filter(|v| *v != function.name) {
            if let Some(global) = extract_global(&text, var) {
                lines.push(strip_line(global));
            }
        }
        Ok(Some(lines))
    }
}

impl EquivalenceChecker for IrTextChecker {
    fn name(&self) -> &'static str {
        "ir-text"
    }

    fn check(&self, request: &CheckRequest) -> Result<CheckOutcome, CheckerError> {
        let normalization = Normalization::for_request(request);
        let Some(old) = self.function_lines(&request.old, normalization)? else {
            return Ok(CheckOutcome::new(missing(&request.old)));
        };
        let Some(new) = self.function_lines(&request.new, normalization)? else {
            return Ok(CheckOutcome::new(missing(&request.new)));
        };

        let artifacts = match &request.emit_ir {
            Some(dir) => write_simplified(dir, &request.old.name, &old, &new)?,
            None => Vec::new(),
        };
        let verdict = if old == new {
            Verdict::Equal
        } else {
            debug!(function = %request.old.name, "normalized IR differs");
            Verdict::Different { diff: line_diff(&old, &new) }
        };
        Ok(CheckOutcome::new(verdict).with_artifacts(artifacts))
    }
}

fn missing(function: &IrFunction) -> Verdict {
    Verdict::InternalError {
        severity: Severity::Error,
        message: format!(
            "function {} not found in {}",
            function.name,
            function.module.display()
        ),
    }
}

fn write_simplified(
    dir: &Path,
    name: &str,
    old: &[String],
    new: &[String],
) -> Result<Vec<PathBuf>, CheckerError> {
    let io_err = |path: &Path, e: std::io::Error| CheckerError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let mut written = Vec::new();
    for (side, lines) in [("old", old), ("new", new)] {
        let path = dir.join(format!("{name}.{side}.ll"));
        let mut body = lines.join("\n");
        body.push('\n');
        std::fs::write(&path, body).map_err(|e| io_err(&path, e))?;
        written.push(path);
    }
    Ok(written)
}

/// Which optional rewrites to apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Normalization {
    pub kernel_prints: bool,
    pub dead_code: bool,
    pub control_flow_only: bool,
}

impl Normalization {
    pub fn for_request(request: &CheckRequest) -> Self {
        let set = request.patterns.set;
        Self {
            kernel_prints: set.contains(Pattern::KernelPrints),
            dead_code: set.contains(Pattern::DeadCode),
            control_flow_only: request.control_flow_only
                || set.contains(Pattern::ControlFlowOnly),
        }
    }
}

fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn metadata_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r",?\s+![A-Za-z_.][\w.]*\s+!\d+")
}

fn attribute_ref_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"\s#\d+\b")
}

fn label_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"^([-\w.$]+):")
}

fn successor_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"label %([-\w.$]+)")
}

fn local_def_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"^\s*%([-\w.$]+)\s*=")
}

fn param_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"%([-\w.$]+)\s*[,)]")
}

fn local_use_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"%([-\w.$]+)")
}

fn callee_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"\bcall\b[^@]*@([-\w.$]+)\(")
}

fn kernel_print_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(
        &RE,
        r"\bcall\b[^@]*@(?:_?printk|_?dev_(?:emerg|alert|crit|err|warn|notice|info|dbg)|__dynamic_(?:pr|dev)_debug)\(",
    )
}

/// Lines of the definition of `@name`, from `define` to the closing brace.
pub fn extract_function<'a>(text: &'a str, name: &str) -> Option<Vec<&'a str>> {
    let needle = format!("@{name}(");
    let mut lines = text.lines();
    let header = lines.by_ref().find(|l| l.starts_with("define ") && l.contains(&needle))?;
    let mut body = vec![header];
    for line in lines {
        body.push(line);
        if line.trim_end() == "}" {
            return Some(body);
        }
    }
    None
}

/// The definition line of global `@name`.
pub fn extract_global<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("@{name} =");
    text.lines().find(|l| l.starts_with(&prefix))
}

fn strip_line(line: &str) -> String {
    let mut line = line.to_string();
    if let Some(re) = metadata_re() {
        line = re.replace_all(&line, "").into_owned();
    }
    if let Some(re) = attribute_ref_re() {
        line = re.replace_all(&line, "").into_owned();
    }
    line.trim_end().to_string()
}

fn is_label(line: &str) -> bool {
    label_re().is_some_and(|re| re.is_match(line))
}

fn is_debug_intrinsic(line: &str) -> bool {
    line.contains("@llvm.dbg.") || line.trim_start().starts_with("#dbg_")
}

/// Normalize a function body as returned by [`extract_function`].
pub fn normalize(body: &[&str], normalization: Normalization) -> Vec<String> {
    let mut lines: Vec<String> = Vec::with_capacity(body.len());
    for raw in body {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') || is_debug_intrinsic(raw) {
            continue;
        }
        if normalization.kernel_prints && kernel_print_re().is_some_and(|re| re.is_match(raw)) {
            continue;
        }
        let mut line = strip_line(raw);
        if is_label(&line) {
            if let Some((label, _comment)) = line.split_once(';') {
                line = label.trim_end().to_string();
            }
        }
        lines.push(line);
    }

    if normalization.dead_code {
        lines = drop_unreachable_blocks(lines);
    }
    if normalization.control_flow_only {
        lines = control_flow(lines);
    }
    renumber_locals(lines)
}

struct Block {
    label: Option<String>,
    lines: Vec<String>,
}

/// Split the body (between the header and the closing brace) into blocks.
fn blocks(body: &[String]) -> Vec<Block> {
    let mut blocks = vec![Block { label: None, lines: Vec::new() }];
    for line in body {
        let label = label_re().and_then(|re| re.captures(line)).map(|c| c[1].to_string());
        match label {
            Some(label) => {
                let current_is_empty_entry =
                    blocks.len() == 1 && blocks[0].label.is_none() && blocks[0].lines.is_empty();
                if current_is_empty_entry {
                    blocks[0].label = Some(label);
                    blocks[0].lines.push(line.clone());
                } else {
                    blocks.push(Block { label: Some(label), lines: vec![line.clone()] });
                }
            }
            None => {
                if let Some(current) = blocks.last_mut() {
                    current.lines.push(line.clone());
                }
            }
        }
    }
    blocks
}

fn drop_unreachable_blocks(lines: Vec<String>) -> Vec<String> {
    if lines.len() < 2 {
        return lines;
    }
    let (header, rest) = lines.split_at(1);
    let (body, footer) = rest.split_at(rest.len() - 1);
    let blocks = blocks(body);

    let by_label: HashMap<&str, usize> = blocks
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.label.as_deref().map(|l| (l, i)))
        .collect();
    let mut reachable = HashSet::from([0usize]);
    let mut queue = VecDeque::from([0usize]);
    while let Some(index) = queue.pop_front() {
        for line in &blocks[index].lines {
            let Some(re) = successor_re() else { continue };
            for cap in re.captures_iter(line) {
                if let Some(&next) = by_label.get(&cap[1]) {
                    if reachable.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
    }

    let mut kept = header.to_vec();
    for (index, block) in blocks.into_iter().enumerate() {
        if reachable.contains(&index) {
            kept.extend(block.lines);
        }
    }
    kept.extend_from_slice(footer);
    kept
}

fn control_flow(lines: Vec<String>) -> Vec<String> {
    let last = lines.len().saturating_sub(1);
    lines
        .into_iter()
        .enumerate()
        .filter_map(|(i, line)| {
            if i == 0 || i == last || is_label(&line) {
                return Some(line);
            }
            let trimmed = line.trim_start();
            if trimmed.starts_with("ret") {
                return Some("  ret".to_string());
            }
            let terminator = ["br ", "switch ", "indirectbr ", "unreachable", "resume "]
                .iter()
                .any(|t| trimmed.starts_with(t));
            if terminator || trimmed.contains("label %") || trimmed == "]" {
                return Some(line);
            }
            callee_re()
                .and_then(|re| re.captures(&line))
                .map(|cap| format!("  call @{}", &cap[1]))
        })
        .collect()
}

/// Rename parameters, values and blocks defined in the function to their
/// definition index.
fn renumber_locals(lines: Vec<String>) -> Vec<String> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let define = |name: &str, index: &mut HashMap<String, usize>| {
        let next = index.len();
        index.entry(name.to_string()).or_insert(next);
    };
    if let (Some(header), Some(re)) = (lines.first(), param_re()) {
        for cap in re.captures_iter(header) {
            define(&cap[1], &mut index);
        }
    }
    for line in lines.iter().skip(1) {
        let defined = label_re()
            .and_then(|re| re.captures(line))
            .or_else(|| local_def_re().and_then(|re| re.captures(line)));
        if let Some(cap) = defined {
            define(&cap[1], &mut index);
        }
    }

    let (Some(uses), Some(labels)) = (local_use_re(), label_re()) else {
        return lines;
    };
    lines
        .into_iter()
        .map(|line| {
            let line = labels.replace(&line, |cap: &regex::Captures<'_>| match index.get(&cap[1]) {
                Some(n) => format!("{n}:"),
                None => cap[0].to_string(),
            });
            uses.replace_all(&line, |cap: &regex::Captures<'_>| match index.get(&cap[1]) {
                Some(n) => format!("%{n}"),
                None => cap[0].to_string(),
            })
            .into_owned()
        })
        .collect()
}

/// Line diff of two normalized bodies with a little context around changes.
///
/// Hunks are separated by `...`. Past [`DIFF_TIME_BUDGET`] the remaining
/// region is reported as one replacement instead of a minimal edit script.
pub fn line_diff(old: &[String], new: &[String]) -> String {
    let deadline = Instant::now() + DIFF_TIME_BUDGET;
    let ops = similar::capture_diff_slices_deadline(Algorithm::Myers, old, new, Some(deadline));

    let mut out = String::new();
    for (n, hunk) in similar::group_diff_ops(ops, DIFF_CONTEXT).iter().enumerate() {
        if n > 0 {
            out.push_str("...\n");
        }
        for op in hunk {
            let (tag, old_range, new_range) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => push_lines(&mut out, ' ', &old[old_range]),
                DiffTag::Delete => push_lines(&mut out, '-', &old[old_range]),
                DiffTag::Insert => push_lines(&mut out, '+', &new[new_range]),
                DiffTag::Replace => {
                    push_lines(&mut out, '-', &old[old_range]);
                    push_lines(&mut out, '+', &new[new_range]);
                }
            }
        }
    }
    out
}

fn push_lines(out: &mut String, marker: char, lines: &[String]) {
    for line in lines {
        let _ = writeln!(out, "{marker}{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = r#"; ModuleID = 'a.c'
@counter = dso_local global i32 0, align 4, !dbg !0

; Function Attrs: noinline nounwind
define dso_local i32 @f(i32 noundef %x) #0 !dbg !10 {
entry:
  %x.addr = alloca i32, align 4
  call void @llvm.dbg.declare(metadata ptr %x.addr, metadata !15, metadata !DIExpression()), !dbg !16
  %call = call i32 (ptr, ...) @_printk(ptr noundef @.str), !dbg !17
  %add = add nsw i32 %x, 1, !dbg !18
  ret i32 %add, !dbg !19

dead:                                             ; No predecessors!
  ret i32 0
}

define dso_local void @g() #0 {
entry:
  ret void
}
"#;

    fn lines(normalization: Normalization) -> Vec<String> {
        let body = extract_function(MODULE, "f").unwrap();
        normalize(&body, normalization)
    }

    #[test]
    fn extracts_function_and_global() {
        let body = extract_function(MODULE, "g").unwrap();
        assert_eq!(body.len(), 4);
        assert!(extract_function(MODULE, "missing").is_none());
        assert!(extract_global(MODULE, "counter").unwrap().contains("global i32 0"));
    }

    #[test]
    fn strips_debug_info_and_renumbers() {
        let out = lines(Normalization::default());
        assert_eq!(out[0], "define dso_local i32 @f(i32 noundef %0) {");
        assert!(out.iter().all(|l| !l.contains("!dbg") && !l.contains("llvm.dbg")));
        assert!(out.contains(&"  %4 = add nsw i32 %0, 1".to_string()));
        assert!(out.contains(&"5:".to_string()));
    }

    #[test]
    fn kernel_prints_and_dead_code_are_optional() {
        let plain = lines(Normalization::default());
        assert!(plain.iter().any(|l| l.contains("@_printk")));

        let reduced =
            lines(Normalization { kernel_prints: true, dead_code: true, ..Default::default() });
        assert!(reduced.iter().all(|l| !l.contains("@_printk")));
        assert!(reduced.iter().all(|l| l != "  ret i32 0"));
    }

    #[test]
    fn control_flow_only_keeps_terminators_and_callees() {
        let out = lines(Normalization { control_flow_only: true, ..Default::default() });
        assert!(out.contains(&"  call @_printk".to_string()));
        assert!(out.iter().all(|l| !l.contains("add nsw")));
        assert!(out.contains(&"  ret".to_string()));
    }

    #[test]
    fn diff_marks_changed_lines() {
        let old: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let new: Vec<String> = ["a", "x", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(line_diff(&old, &new), " a\n-b\n+x\n c\n");
    }

    #[test]
    fn distant_changes_form_separate_hunks() {
        let old: Vec<String> = (0..20).map(|i| format!("line {i}")).collect();
        let mut new = old.clone();
        new[1] = "changed 1".to_string();
        new[15] = "changed 15".to_string();
        let diff = line_diff(&old, &new);
        assert!(diff.starts_with(" line 0\n-line 1\n+changed 1\n line 2\n line 3\n...\n"));
        assert!(diff.ends_with(" line 13\n line 14\n-line 15\n+changed 15\n line 16\n line 17\n"));
        assert!(!diff.contains("line 8"));
    }

    #[test]
    fn large_bodies_that_differ_everywhere_still_diff() {
        let old: Vec<String> = (0..20_000).map(|i| format!("  %{i} = add i32 %a, {i}")).collect();
        let new: Vec<String> = (0..20_000).map(|i| format!("  %{i} = sub i32 %a, {i}")).collect();
        let diff = line_diff(&old, &new);
        assert_eq!(diff.lines().filter(|l| l.starts_with('-')).count(), 20_000);
        assert_eq!(diff.lines().filter(|l| l.starts_with('+')).count(), 20_000);
    }
}
