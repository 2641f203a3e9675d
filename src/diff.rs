//! Migration-aware catalog diffing
//!
//! Catalog changes are presented as unified diffs. When a migration mode
//! is selected, known non-semantic changes are hidden: the Kapitan
//! 0.29-to-0.30 mode sorts multi-object YAML streams and ignores the
//! Tiller-to-Helm label rename and dropped null documents; the
//! ignore-yaml-formatting mode canonicalizes both sides before diffing.
//! Migration modes only change what is shown and what counts as a
//! material change; the files themselves are never rewritten.

use similar::TextDiff;

use crate::config::Migration;
use crate::error::Result;
use crate::k8sobject::sort_objects;
use crate::yaml;

/// Outcome of diffing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub text: String,
    /// True when the change is purely non-semantic under the selected
    /// migration mode.
    pub suppressed: bool,
}

/// Diff one file's before/after content under the selected migration.
pub fn diff_file(
    before: &str,
    after: &str,
    fromfile: &str,
    tofile: &str,
    migration: Option<Migration>,
) -> Result<FileDiff> {
    match migration {
        None => Ok(plain_diff(before, after, fromfile, tofile)),
        Some(Migration::IgnoreYamlFormatting) => {
            ignore_formatting_diff(before, after, fromfile, tofile)
        }
        Some(Migration::Kapitan029To030) => kapitan_029_030_diff(before, after, fromfile, tofile),
    }
}

fn plain_diff(before: &str, after: &str, fromfile: &str, tofile: &str) -> FileDiff {
    let diff = TextDiff::from_lines(before, after);
    let text = diff
        .unified_diff()
        .header(fromfile, tofile)
        .to_string()
        .trim_end()
        .to_string();
    FileDiff {
        suppressed: before == after,
        text,
    }
}

/// Canonicalize a YAML document stream: parse, sort objects, re-dump.
///
/// Inputs which fail to parse are returned verbatim so non-YAML catalog
/// files still diff sensibly.
fn canonicalize(text: &str) -> String {
    match yaml::load_all_str(text) {
        Ok(mut docs) => {
            sort_objects(&mut docs);
            yaml::to_string_all(&docs).unwrap_or_else(|_| text.to_string())
        }
        Err(_) => text.to_string(),
    }
}

fn ignore_formatting_diff(
    before: &str,
    after: &str,
    fromfile: &str,
    tofile: &str,
) -> Result<FileDiff> {
    let before_canonical = canonicalize(before);
    let after_canonical = canonicalize(after);
    let mut diff = plain_diff(&before_canonical, &after_canonical, fromfile, tofile);
    diff.suppressed = before_canonical == after_canonical;
    Ok(diff)
}

fn kapitan_029_030_diff(
    before: &str,
    after: &str,
    fromfile: &str,
    tofile: &str,
) -> Result<FileDiff> {
    let before_canonical = canonicalize(before);
    let after_canonical = canonicalize(after);
    let diff = plain_diff(&before_canonical, &after_canonical, fromfile, tofile);
    let lines: Vec<&str> = diff.text.lines().collect();
    // Skip the two header lines; pairs of subsequent lines decide whether
    // anything semantic changed.
    let body = if lines.len() > 2 { &lines[2..] } else { &[][..] };
    let suppressed = !body
        .windows(2)
        .any(|w| is_semantic_diff_kapitan_029_030(w[0], w[1]))
        && !body.is_empty()
        || before_canonical == after_canonical;
    Ok(FileDiff {
        text: diff.text,
        suppressed,
    })
}

/// Decide whether a pair of diff lines indicates a semantic change under
/// the Kapitan 0.29 -> 0.30 migration.
///
/// Treated as non-semantic: the `app.kubernetes.io/managed-by` and
/// `heritage` values changing from Tiller to Helm, and `null` objects no
/// longer being emitted in multi-object streams.
fn is_semantic_diff_kapitan_029_030(raw_a: &str, raw_b: &str) -> bool {
    let line_a = raw_a.trim_end();
    let line_b = raw_b.trim_end();

    // Context and hunk-header lines never carry a change.
    if raw_a.starts_with(' ')
        || raw_b.starts_with(' ')
        || line_a.starts_with("@@")
        || line_b.starts_with("@@")
    {
        return false;
    }

    // Dropped null documents.
    if line_a == "-null" && (line_b == "----" || line_b == "---- null") {
        return false;
    }
    if line_a == "---- null" && (line_b == "----" || line_b == "---- null") {
        return false;
    }

    // Tiller -> Helm as object manager.
    if line_a.starts_with('-') && line_b.starts_with('+') {
        if line_a.ends_with("app.kubernetes.io/managed-by: Tiller")
            && line_b.ends_with("app.kubernetes.io/managed-by: Helm")
        {
            return false;
        }
        if line_a.ends_with("heritage: Tiller") && line_b.ends_with("heritage: Helm") {
            return false;
        }
    }

    true
}

/// Colorize one unified diff line for terminal output.
pub fn colorize_diff_line(line: &str) -> String {
    if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("@@ ") {
        console::style(line).yellow().to_string()
    } else if line.starts_with('+') {
        console::style(line).green().to_string()
    } else if line.starts_with('-') {
        console::style(line).red().to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_diff_reports_changes() {
        let d = diff_file("a: 1\n", "a: 2\n", "file", "file", None).unwrap();
        assert!(!d.suppressed);
        assert!(d.text.contains("-a: 1"));
        assert!(d.text.contains("+a: 2"));
    }

    #[test]
    fn test_plain_diff_formatting_change_is_material() {
        let d = diff_file("a: \"1\"\n", "a: '1'\n", "f", "f", None).unwrap();
        assert!(!d.suppressed);
    }

    #[test]
    fn test_ignore_yaml_formatting_suppresses_quoting() {
        let d = diff_file(
            "a: \"x\"\n",
            "a: x\n",
            "f",
            "f",
            Some(Migration::IgnoreYamlFormatting),
        )
        .unwrap();
        assert!(d.suppressed);
    }

    #[test]
    fn test_ignore_yaml_formatting_suppresses_reordering() {
        let before = "kind: Service\nmetadata:\n  name: b\n---\nkind: Service\nmetadata:\n  name: a\n";
        let after = "kind: Service\nmetadata:\n  name: a\n---\nkind: Service\nmetadata:\n  name: b\n";
        let d = diff_file(before, after, "f", "f", Some(Migration::IgnoreYamlFormatting)).unwrap();
        assert!(d.suppressed);
    }

    #[test]
    fn test_ignore_yaml_formatting_keeps_semantic_change() {
        let d = diff_file(
            "a: 1\n",
            "a: 2\n",
            "f",
            "f",
            Some(Migration::IgnoreYamlFormatting),
        )
        .unwrap();
        assert!(!d.suppressed);
    }

    #[test]
    fn test_kapitan_migration_suppresses_tiller_to_helm() {
        let before = "kind: Deployment\nmetadata:\n  labels:\n    app.kubernetes.io/managed-by: Tiller\n  name: web\n";
        let after = "kind: Deployment\nmetadata:\n  labels:\n    app.kubernetes.io/managed-by: Helm\n  name: web\n";
        let d = diff_file(before, after, "f", "f", Some(Migration::Kapitan029To030)).unwrap();
        assert!(d.suppressed);
    }

    #[test]
    fn test_kapitan_migration_keeps_real_change() {
        let before = "kind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 1\n";
        let after = "kind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 2\n";
        let d = diff_file(before, after, "f", "f", Some(Migration::Kapitan029To030)).unwrap();
        assert!(!d.suppressed);
    }

    #[test]
    fn test_identical_input_suppressed() {
        let d = diff_file("a: 1\n", "a: 1\n", "f", "f", None).unwrap();
        assert!(d.suppressed);
    }
}
