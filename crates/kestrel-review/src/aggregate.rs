//! Cross-chunk aggregation and deduplication.
//!
//! Findings from independent chunks are merged into one coherent comment
//! set: exact duplicates collapse by fingerprint, near-duplicates at the
//! same location merge by body similarity, a severity floor applies, and
//! the output is sorted by (file path, line) for a deterministic review.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use kestrel_core::{normalize_body, Finding, ReviewComment, ReviewConfig, Severity};

/// Aggregation policy, read once from configuration.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Lowest severity to keep.
    pub min_severity: Severity,
    /// Jaccard similarity at which same-location findings merge.
    pub near_dup_threshold: f64,
    /// Maximum number of comments to emit.
    pub max_comments: usize,
}

impl AggregateOptions {
    /// Extract the aggregation policy from review configuration.
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            min_severity: config.min_severity,
            near_dup_threshold: config.near_dup_threshold,
            max_comments: config.max_comments,
        }
    }
}

/// Merge findings from all chunks into a deduplicated, ordered comment
/// set.
///
/// Idempotent on duplicated input: feeding the same findings twice yields
/// the same comments as feeding them once.
///
/// # Examples
///
/// ```
/// use kestrel_core::{Finding, ReviewConfig, Severity};
/// use kestrel_review::aggregate::{aggregate, AggregateOptions};
/// use std::path::PathBuf;
///
/// let finding = Finding::new(
///     PathBuf::from("a.py"),
///     42,
///     Severity::Warning,
///     "Off-by-one".into(),
///     "Loop bound excludes the last element".into(),
/// );
/// let opts = AggregateOptions::from_config(&ReviewConfig::default());
/// let comments = aggregate(vec![finding.clone(), finding], &opts);
/// assert_eq!(comments.len(), 1);
/// ```
pub fn aggregate(findings: Vec<Finding>, options: &AggregateOptions) -> Vec<ReviewComment> {
    // 1. Exact dedup by fingerprint; the surviving representative takes
    //    the highest severity seen in its group.
    let mut by_fingerprint: HashMap<String, Finding> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for finding in findings {
        match by_fingerprint.entry(finding.fingerprint.clone()) {
            Entry::Occupied(mut existing) => {
                let kept = existing.get_mut();
                kept.severity = kept.severity.max(finding.severity);
            }
            Entry::Vacant(slot) => {
                order.push(finding.fingerprint.clone());
                slot.insert(finding);
            }
        }
    }

    // 2. Group by location, preserving first-seen order within a group
    //    so merging is deterministic.
    let mut by_location: BTreeMap<(PathBuf, u32), Vec<Finding>> = BTreeMap::new();
    for fingerprint in order {
        if let Some(finding) = by_fingerprint.remove(&fingerprint) {
            by_location
                .entry((finding.file_path.clone(), finding.line))
                .or_default()
                .push(finding);
        }
    }

    // 3. Near-duplicate merge within each location, severity floor, and
    //    comment rendering. BTreeMap iteration gives (path, line) order.
    let mut comments: Vec<ReviewComment> = Vec::new();
    for ((path, line), group) in by_location {
        for cluster in cluster_similar(group, options.near_dup_threshold) {
            let severity = cluster
                .iter()
                .map(|f| f.severity)
                .reduce(Severity::max)
                .unwrap_or(Severity::Info);
            if !severity.meets_threshold(options.min_severity) {
                continue;
            }
            comments.push(ReviewComment {
                file_path: path.clone(),
                line,
                body: render_cluster(&cluster),
                severity: Some(severity),
            });
        }
    }

    // 4. Cap the comment count, dropping the least severe first, then
    //    restore location order.
    if comments.len() > options.max_comments {
        comments.sort_by_key(|c| c.severity.map_or(u8::MAX, severity_rank));
        comments.truncate(options.max_comments);
        comments.sort_by(|a, b| (&a.file_path, a.line).cmp(&(&b.file_path, b.line)));
    }

    comments
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Blocking => 0,
        Severity::Warning => 1,
        Severity::Suggestion => 2,
        Severity::Info => 3,
    }
}

/// Partition same-location findings into clusters of mutually similar
/// bodies. Greedy: each finding joins the first cluster whose
/// representative it resembles.
fn cluster_similar(findings: Vec<Finding>, threshold: f64) -> Vec<Vec<Finding>> {
    let mut clusters: Vec<Vec<Finding>> = Vec::new();
    for finding in findings {
        let target = clusters
            .iter()
            .position(|c| body_similarity(&c[0].body, &finding.body) >= threshold);
        match target {
            Some(i) => clusters[i].push(finding),
            None => clusters.push(vec![finding]),
        }
    }
    clusters
}

/// Jaccard similarity over the normalized word sets of two bodies.
fn body_similarity(a: &str, b: &str) -> f64 {
    let a_norm = normalize_body(a);
    let b_norm = normalize_body(b);
    let a_words: HashSet<&str> = a_norm.split_whitespace().collect();
    let b_words: HashSet<&str> = b_norm.split_whitespace().collect();
    if a_words.is_empty() && b_words.is_empty() {
        return 1.0;
    }
    let intersection = a_words.intersection(&b_words).count();
    let union = a_words.union(&b_words).count();
    intersection as f64 / union as f64
}

/// Render a cluster as one comment body, concatenating distinct points.
fn render_cluster(cluster: &[Finding]) -> String {
    let first = &cluster[0];
    let mut body = if first.title.trim().is_empty() {
        first.body.clone()
    } else {
        format!("**{}**\n\n{}", first.title.trim(), first.body)
    };

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(normalize_body(&first.body));
    for other in &cluster[1..] {
        let normalized = normalize_body(&other.body);
        if seen.insert(normalized) {
            body.push_str("\n\nAlso: ");
            body.push_str(&other.body);
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(file: &str, line: u32, severity: Severity, body: &str) -> Finding {
        Finding::new(
            PathBuf::from(file),
            line,
            severity,
            String::new(),
            body.into(),
        )
    }

    fn default_options() -> AggregateOptions {
        AggregateOptions {
            min_severity: Severity::Info,
            near_dup_threshold: 0.6,
            max_comments: 50,
        }
    }

    #[test]
    fn exact_duplicates_collapse() {
        let f = finding("a.rs", 10, Severity::Warning, "possible overflow here");
        let comments = aggregate(vec![f.clone(), f.clone(), f], &default_options());
        assert_eq!(comments.len(), 1);
    }

    #[test]
    fn duplicate_keeps_highest_severity() {
        let low = finding("a.rs", 10, Severity::Suggestion, "possible overflow here");
        let high = finding("a.rs", 10, Severity::Blocking, "possible overflow here");
        let comments = aggregate(vec![low, high], &default_options());
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].severity, Some(Severity::Blocking));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let batch = vec![
            finding("a.rs", 10, Severity::Warning, "unchecked index can panic"),
            finding("b.rs", 5, Severity::Info, "consider renaming this"),
        ];
        let mut doubled = batch.clone();
        doubled.extend(batch.clone());

        let once = aggregate(batch, &default_options());
        let twice = aggregate(doubled, &default_options());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(&twice) {
            assert_eq!(a.file_path, b.file_path);
            assert_eq!(a.line, b.line);
            assert_eq!(a.body, b.body);
        }
    }

    #[test]
    fn near_duplicates_at_same_location_merge() {
        // Two chunks re-derive the same issue with minor wording changes.
        let a = finding(
            "a.py",
            42,
            Severity::Warning,
            "division by zero when the list is empty",
        );
        let b = finding(
            "a.py",
            42,
            Severity::Warning,
            "possible division by zero when list is empty",
        );
        assert_ne!(a.fingerprint, b.fingerprint);

        let comments = aggregate(vec![a, b], &default_options());
        assert_eq!(comments.len(), 1);
    }

    #[test]
    fn dissimilar_findings_at_same_location_stay_separate() {
        let a = finding("a.py", 42, Severity::Warning, "division by zero risk");
        let b = finding(
            "a.py",
            42,
            Severity::Info,
            "this variable name shadows an outer binding",
        );
        let comments = aggregate(vec![a, b], &default_options());
        assert_eq!(comments.len(), 2);
    }

    #[test]
    fn merged_body_concatenates_distinct_points() {
        let a = finding(
            "a.py",
            42,
            Severity::Warning,
            "division by zero when the input list is empty",
        );
        let b = finding(
            "a.py",
            42,
            Severity::Warning,
            "division by zero when the input list is empty today",
        );
        let comments = aggregate(vec![a, b], &default_options());
        assert_eq!(comments.len(), 1);
        assert!(comments[0].body.contains("Also: "));
    }

    #[test]
    fn output_sorted_by_path_then_line() {
        let comments = aggregate(
            vec![
                finding("z.rs", 1, Severity::Warning, "last file"),
                finding("a.rs", 20, Severity::Warning, "second line"),
                finding("a.rs", 3, Severity::Warning, "first line"),
                finding("m.rs", 7, Severity::Warning, "middle file"),
            ],
            &default_options(),
        );
        let locations: Vec<(String, u32)> = comments
            .iter()
            .map(|c| (c.file_path.to_string_lossy().to_string(), c.line))
            .collect();
        assert_eq!(
            locations,
            vec![
                ("a.rs".to_string(), 3),
                ("a.rs".to_string(), 20),
                ("m.rs".to_string(), 7),
                ("z.rs".to_string(), 1),
            ]
        );
    }

    #[test]
    fn severity_floor_filters() {
        let options = AggregateOptions {
            min_severity: Severity::Warning,
            ..default_options()
        };
        let comments = aggregate(
            vec![
                finding("a.rs", 1, Severity::Blocking, "real problem found here"),
                finding("b.rs", 2, Severity::Info, "informational note only"),
            ],
            &options,
        );
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].severity, Some(Severity::Blocking));
    }

    #[test]
    fn comment_cap_drops_least_severe_and_keeps_order() {
        let options = AggregateOptions {
            max_comments: 2,
            ..default_options()
        };
        let comments = aggregate(
            vec![
                finding("a.rs", 1, Severity::Info, "informational note number one"),
                finding("b.rs", 2, Severity::Blocking, "a genuine blocking defect"),
                finding("c.rs", 3, Severity::Warning, "a warning worth reading"),
            ],
            &options,
        );
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].severity, Some(Severity::Blocking));
        assert_eq!(comments[1].severity, Some(Severity::Warning));
        assert!(comments[0].file_path < comments[1].file_path);
    }

    #[test]
    fn similarity_is_tunable() {
        let strict = AggregateOptions {
            near_dup_threshold: 0.99,
            ..default_options()
        };
        let a = finding("a.py", 42, Severity::Warning, "division by zero risk here");
        let b = finding(
            "a.py",
            42,
            Severity::Warning,
            "possible division by zero risk here",
        );
        // Near-identical but not equal: merged at 0.6, separate at 0.99.
        assert_eq!(aggregate(vec![a.clone(), b.clone()], &default_options()).len(), 1);
        assert_eq!(aggregate(vec![a, b], &strict).len(), 2);
    }

    #[test]
    fn title_is_bolded_in_body() {
        let f = Finding::new(
            PathBuf::from("a.rs"),
            1,
            Severity::Warning,
            "Unchecked index".into(),
            "indexing may panic".into(),
        );
        let comments = aggregate(vec![f], &default_options());
        assert!(comments[0].body.starts_with("**Unchecked index**"));
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(aggregate(vec![], &default_options()).is_empty());
    }
}
