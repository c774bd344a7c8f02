//! Benchmark list emission and display-name compaction.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

/// Well-known resource path of the benchmark list, as looked up from a
/// deployed bundle root.
pub const BENCHMARK_LIST: &str = "/META-INF/BenchmarkList";

/// Render the list: one `<owner>.<method>` per line, ascending, trailing
/// newline.
pub(crate) fn render_list(methods: &BTreeSet<String>) -> String {
    let mut out = String::new();
    for method in methods {
        out.push_str(method);
        out.push('\n');
    }
    out
}

/// Write the rendered list under `root` at [`BENCHMARK_LIST`].
pub(crate) fn write_list(root: &Path, methods: &BTreeSet<String>) -> io::Result<PathBuf> {
    let path = root.join(&BENCHMARK_LIST[1..]);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, render_list(methods))?;
    Ok(path)
}

/// Compact a set of qualified names for display: the common dotted prefix is
/// shortened segment by segment, but only through the leading all-lowercase
/// (package-looking) run.
pub fn dense_display_names<S: AsRef<str>>(ids: &[S]) -> BTreeMap<String, String> {
    if ids.is_empty() {
        return BTreeMap::new();
    }

    let mut prefix: Option<Vec<&str>> = None;
    for id in ids {
        let segments: Vec<&str> = id.as_ref().split('.').collect();
        match &mut prefix {
            None => prefix = Some(segments),
            Some(prefix) => {
                let run = prefix
                    .iter()
                    .zip(&segments)
                    .take_while(|(a, b)| *a == *b)
                    .count();
                prefix.truncate(run);
            }
        }
    }
    let prefix = prefix.unwrap_or_default();

    let mut shortened: Vec<String> = Vec::with_capacity(prefix.len());
    let mut shortening = true;
    for segment in &prefix {
        if shortening && segment.chars().all(|c| !c.is_uppercase()) {
            shortened.push(segment.chars().take(1).collect());
        } else {
            shortening = false;
            shortened.push((*segment).to_string());
        }
    }

    let mut result = BTreeMap::new();
    for id in ids {
        let segments: Vec<&str> = id.as_ref().split('.').collect();
        let dense: Vec<&str> = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| match shortened.get(i) {
                Some(short) => short.as_str(),
                None => *segment,
            })
            .collect();
        result.insert(id.as_ref().to_string(), dense.join("."));
    }
    result
}
