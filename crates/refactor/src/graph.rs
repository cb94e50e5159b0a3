//! Transitive reduction, cycle detection, and topological leveling over the
//! file dependency graph produced by the AST analyzer.
//!
//! All paths are normalized once on entry via [`normalize_path`] so graph
//! comparisons never depend on separator style or platform case-folding;
//! callers re-denormalize only when handing a path back to the OS/git.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use refactor_types::{DependencyContext, GraphAnalysisResult, HighImpactSummary};

/// Normalize a path to a canonical forward-slashed form, lower-cased on
/// case-insensitive platforms. Used everywhere two paths are compared so a
/// `src\\Foo.ts` edge and a `src/Foo.ts` lookup key agree.
pub fn normalize_path(path: &Path) -> PathBuf {
    let as_str = path.to_string_lossy().replace('\\', "/");
    #[cfg(target_os = "windows")]
    let as_str = as_str.to_lowercase();
    PathBuf::from(as_str)
}

/// Build the simplified `file -> [file]` graph the engine operates on from a
/// [`DependencyContext`]'s resolved imports.
fn build_file_graph(context: &DependencyContext) -> BTreeMap<PathBuf, Vec<PathBuf>> {
    let mut graph: BTreeMap<PathBuf, BTreeSet<PathBuf>> = BTreeMap::new();
    for file in context.files.keys() {
        graph.entry(normalize_path(file)).or_default();
    }
    for (file, targets) in &context.dependency_graph {
        let from = normalize_path(file);
        let entry = graph.entry(from).or_default();
        for target in targets {
            entry.insert(normalize_path(target));
        }
    }
    graph
        .into_iter()
        .map(|(k, v)| (k, v.into_iter().collect()))
        .collect()
}

/// Remove edges whose target is reachable from the same source via another
/// edge (BFS from each direct successor). Returns the reduced graph and the
/// fraction of edges removed.
pub fn transitive_reduction(graph: &BTreeMap<PathBuf, Vec<PathBuf>>) -> (BTreeMap<PathBuf, Vec<PathBuf>>, f64) {
    let mut reduced: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut total_edges = 0usize;
    let mut removed_edges = 0usize;

    for (node, targets) in graph {
        total_edges += targets.len();
        let mut keep: Vec<PathBuf> = Vec::new();

        for target in targets {
            let reachable_otherwise = targets.iter().any(|other| {
                other != target && reachable(graph, other, target, &mut BTreeSet::new())
            });
            if reachable_otherwise {
                removed_edges += 1;
            } else {
                keep.push(target.clone());
            }
        }

        reduced.insert(node.clone(), keep);
    }

    let reduction_pct = if total_edges == 0 {
        0.0
    } else {
        removed_edges as f64 / total_edges as f64 * 100.0
    };

    (reduced, reduction_pct)
}

fn reachable(graph: &BTreeMap<PathBuf, Vec<PathBuf>>, from: &Path, to: &Path, seen: &mut BTreeSet<PathBuf>) -> bool {
    if from == to {
        return true;
    }
    if !seen.insert(from.to_path_buf()) {
        return false;
    }
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(from.to_path_buf());

    while let Some(node) = queue.pop_front() {
        if node == to {
            return true;
        }
        if let Some(targets) = graph.get(&node) {
            for next in targets {
                if seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
    }
    false
}

/// Tarjan's strongly-connected-components algorithm, O(V+E). Only SCCs of
/// size >= 2 are reported: single-node "cycles" (a node with no self-loop)
/// aren't real cycles.
pub fn detect_cycles_tarjan(graph: &BTreeMap<PathBuf, Vec<PathBuf>>) -> Vec<Vec<PathBuf>> {
    struct State<'a> {
        graph: &'a BTreeMap<PathBuf, Vec<PathBuf>>,
        index_counter: usize,
        index: BTreeMap<PathBuf, usize>,
        lowlink: BTreeMap<PathBuf, usize>,
        on_stack: BTreeSet<PathBuf>,
        stack: Vec<PathBuf>,
        sccs: Vec<Vec<PathBuf>>,
    }

    fn strongconnect(node: &Path, state: &mut State) {
        let node = node.to_path_buf();
        state.index.insert(node.clone(), state.index_counter);
        state.lowlink.insert(node.clone(), state.index_counter);
        state.index_counter += 1;
        state.stack.push(node.clone());
        state.on_stack.insert(node.clone());

        if let Some(targets) = state.graph.get(&node).cloned() {
            for target in targets {
                if !state.index.contains_key(&target) {
                    strongconnect(&target, state);
                    let target_low = state.lowlink[&target];
                    let node_low = state.lowlink[&node];
                    state.lowlink.insert(node.clone(), node_low.min(target_low));
                } else if state.on_stack.contains(&target) {
                    let target_index = state.index[&target];
                    let node_low = state.lowlink[&node];
                    state.lowlink.insert(node.clone(), node_low.min(target_index));
                }
            }
        }

        if state.lowlink[&node] == state.index[&node] {
            let mut component = Vec::new();
            loop {
                let member = state.stack.pop().expect("stack non-empty while closing scc");
                state.on_stack.remove(&member);
                let is_target = member == node;
                component.push(member);
                if is_target {
                    break;
                }
            }
            component.sort();
            if component.len() >= 2 {
                state.sccs.push(component);
            }
        }
    }

    let mut state = State {
        graph,
        index_counter: 0,
        index: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        on_stack: BTreeSet::new(),
        stack: Vec::new(),
        sccs: Vec::new(),
    };

    for node in graph.keys() {
        if !state.index.contains_key(node) {
            strongconnect(node, &mut state);
        }
    }

    state.sccs.sort();
    state.sccs
}

/// Kahn's algorithm over the reduced graph, with every member of a cycle
/// collapsed to a single shared level (the level that first satisfies the
/// cycle's external dependencies).
pub fn compute_topological_levels(
    graph: &BTreeMap<PathBuf, Vec<PathBuf>>,
    cycles: &[Vec<PathBuf>],
) -> BTreeMap<PathBuf, usize> {
    let mut file_to_cycle: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for (idx, cycle) in cycles.iter().enumerate() {
        for file in cycle {
            file_to_cycle.insert(file.clone(), idx);
        }
    }

    // Collapse each cycle to a representative node for leveling purposes.
    let representative = |file: &Path| -> PathBuf {
        match file_to_cycle.get(file) {
            Some(idx) => cycles[*idx][0].clone(),
            None => file.to_path_buf(),
        }
    };

    let mut collapsed_edges: BTreeMap<PathBuf, BTreeSet<PathBuf>> = BTreeMap::new();
    let mut nodes: BTreeSet<PathBuf> = BTreeSet::new();
    for (node, targets) in graph {
        let rep = representative(node);
        nodes.insert(rep.clone());
        for target in targets {
            let target_rep = representative(target);
            nodes.insert(target_rep.clone());
            if target_rep != rep {
                collapsed_edges.entry(rep.clone()).or_default().insert(target_rep);
            }
        }
    }

    // `indegree` here counts each node's own *outgoing* edges (how many
    // dependencies it still has to have leveled) — a leaf with no
    // dependencies starts at 0 and gets level 0. `reverse_dependents[target]`
    // holds the nodes that import `target`, so leveling a dependency can
    // propagate forward to its importers.
    let mut indegree: BTreeMap<PathBuf, usize> = nodes.iter().map(|n| (n.clone(), 0)).collect();
    let mut reverse_dependents: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for (node, targets) in &collapsed_edges {
        *indegree.entry(node.clone()).or_insert(0) += targets.len();
        for target in targets {
            reverse_dependents.entry(target.clone()).or_default().push(node.clone());
        }
    }

    let mut level_of: BTreeMap<PathBuf, usize> = BTreeMap::new();
    let mut ready: BTreeSet<PathBuf> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(n, _)| n.clone())
        .collect();
    for node in &ready {
        level_of.insert(node.clone(), 0);
    }

    let mut remaining = indegree.clone();
    while let Some(node) = ready.iter().next().cloned() {
        ready.remove(&node);
        let node_level = level_of[&node];

        if let Some(importers) = reverse_dependents.get(&node) {
            for importer in importers {
                let deg = remaining.get_mut(importer).expect("known node");
                *deg = deg.saturating_sub(1);
                let candidate_level = node_level + 1;
                let current = level_of.get(importer).copied().unwrap_or(0);
                level_of.insert(importer.clone(), current.max(candidate_level));
                if *deg == 0 {
                    ready.insert(importer.clone());
                }
            }
        }
    }

    // Expand representative levels back out to every file, including
    // original (pre-collapse) file keys from the input graph.
    let mut file_to_level: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for node in graph.keys() {
        let rep = representative(node);
        let level = level_of.get(&rep).copied().unwrap_or(0);
        file_to_level.insert(node.clone(), level);
    }

    file_to_level
}

/// Run the full C8 pipeline: build the simplified graph, reduce it, find
/// cycles, and assign topological levels.
pub fn analyze_graph(context: &DependencyContext) -> GraphAnalysisResult {
    let graph = build_file_graph(context);
    let (reduced_graph, reduction_pct) = transitive_reduction(&graph);
    let cycles = detect_cycles_tarjan(&reduced_graph);
    let file_to_level = compute_topological_levels(&reduced_graph, &cycles);

    let mut file_to_cycle: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for (idx, cycle) in cycles.iter().enumerate() {
        for file in cycle {
            file_to_cycle.insert(file.clone(), idx);
        }
    }

    GraphAnalysisResult {
        reduced_graph,
        reduction_pct,
        cycles,
        file_to_level,
        file_to_cycle,
    }
}

const CRITICAL_DEPENDENTS_THRESHOLD: usize = 30;
const HIGH_DEPENDENTS_THRESHOLD: usize = 15;
const MAX_EXAMPLE_CYCLES: usize = 5;

/// Derive a [`HighImpactSummary`] from a [`DependencyContext`]'s
/// reverse-dependency cardinalities.
pub fn high_impact_summary(context: &DependencyContext, analysis: &GraphAnalysisResult) -> HighImpactSummary {
    let mut dependents_count: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for (file, deps) in &context.reverse_dependencies {
        dependents_count.insert(normalize_path(file), deps.len());
    }

    let mut files: Vec<PathBuf> = dependents_count
        .iter()
        .filter(|(_, count)| **count >= HIGH_DEPENDENTS_THRESHOLD)
        .map(|(file, _)| file.clone())
        .collect();
    files.sort();

    let max_level = analysis.file_to_level.values().copied().max().unwrap_or(0);

    HighImpactSummary {
        files,
        max_level,
        dependents_count,
    }
}

/// Render a markdown digest of the graph analysis for injection into the
/// audit prompt. Capped at roughly 100 lines.
pub fn render_markdown(analysis: &GraphAnalysisResult, summary: &HighImpactSummary) -> String {
    let mut out = String::new();
    out.push_str("# Dependency Graph Summary\n\n");

    let critical: Vec<_> = summary
        .dependents_count
        .iter()
        .filter(|(_, c)| **c >= CRITICAL_DEPENDENTS_THRESHOLD)
        .collect();
    let high: Vec<_> = summary
        .dependents_count
        .iter()
        .filter(|(_, c)| **c >= HIGH_DEPENDENTS_THRESHOLD && **c < CRITICAL_DEPENDENTS_THRESHOLD)
        .collect();

    out.push_str(&format!(
        "- Critical impact files (>= {CRITICAL_DEPENDENTS_THRESHOLD} dependents): {}\n",
        critical.len()
    ));
    for (file, count) in critical.iter().take(10) {
        out.push_str(&format!("  - `{}` ({count} dependents)\n", file.display()));
    }
    out.push_str(&format!(
        "- High impact files ({HIGH_DEPENDENTS_THRESHOLD}-{} dependents): {}\n",
        CRITICAL_DEPENDENTS_THRESHOLD - 1,
        high.len()
    ));
    for (file, count) in high.iter().take(10) {
        out.push_str(&format!("  - `{}` ({count} dependents)\n", file.display()));
    }

    out.push_str(&format!("- Cycles detected: {}\n", analysis.cycles.len()));
    for cycle in analysis.cycles.iter().take(MAX_EXAMPLE_CYCLES) {
        let names: Vec<String> = cycle.iter().map(|p| p.display().to_string()).collect();
        out.push_str(&format!("  - {}\n", names.join(" -> ")));
    }

    let mut level_counts: BTreeMap<usize, usize> = BTreeMap::new();
    for level in analysis.file_to_level.values() {
        *level_counts.entry(*level).or_insert(0) += 1;
    }
    out.push_str("- Topological levels:\n");
    for (level, count) in &level_counts {
        out.push_str(&format!("  - level {level}: {count} files\n"));
    }

    let leaves = level_counts.get(&0).copied().unwrap_or(0);
    out.push_str(&format!("- Total leaves (level 0): {leaves}\n"));
    out.push_str(&format!("- Edge reduction: {:.1}%\n", analysis.reduction_pct));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    fn graph_from(edges: &[(&str, &[&str])]) -> BTreeMap<PathBuf, Vec<PathBuf>> {
        edges
            .iter()
            .map(|(node, targets)| (p(node), targets.iter().map(|t| p(t)).collect()))
            .collect()
    }

    #[test]
    fn normalize_path_converts_backslashes() {
        assert_eq!(normalize_path(Path::new("src\\foo.ts")), p("src/foo.ts"));
    }

    #[test]
    fn transitive_reduction_removes_redundant_edge() {
        // a -> b, a -> c, b -> c: a->c is redundant (reachable via a->b->c).
        let graph = graph_from(&[("a", &["b", "c"]), ("b", &["c"]), ("c", &[])]);
        let (reduced, pct) = transitive_reduction(&graph);
        assert_eq!(reduced[&p("a")], vec![p("b")]);
        assert!(pct > 0.0);
    }

    #[test]
    fn transitive_reduction_preserves_reachability() {
        let graph = graph_from(&[("a", &["b", "c"]), ("b", &["c"]), ("c", &[])]);
        let (reduced, _) = transitive_reduction(&graph);
        assert!(reachable(&reduced, &p("a"), &p("c"), &mut BTreeSet::new()));
        assert!(reachable(&reduced, &p("a"), &p("b"), &mut BTreeSet::new()));
    }

    #[test]
    fn tarjan_detects_simple_cycle() {
        let graph = graph_from(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        let cycles = detect_cycles_tarjan(&graph);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec![p("a"), p("b")]);
    }

    #[test]
    fn tarjan_ignores_acyclic_graph() {
        let graph = graph_from(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        assert!(detect_cycles_tarjan(&graph).is_empty());
    }

    #[test]
    fn topological_levels_respect_edges() {
        let graph = graph_from(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let cycles = detect_cycles_tarjan(&graph);
        let levels = compute_topological_levels(&graph, &cycles);
        assert_eq!(levels[&p("c")], 0);
        assert_eq!(levels[&p("b")], 1);
        assert_eq!(levels[&p("a")], 2);
    }

    #[test]
    fn topological_levels_collapse_cycle_members() {
        let graph = graph_from(&[("a", &["b"]), ("b", &["a"]), ("a", &["c"]), ("c", &[])]);
        let cycles = detect_cycles_tarjan(&graph);
        let levels = compute_topological_levels(&graph, &cycles);
        assert_eq!(levels[&p("a")], levels[&p("b")]);
    }

    #[test]
    fn analyze_graph_end_to_end() {
        let mut context = DependencyContext::default();
        context.dependency_graph.insert(p("a.ts"), vec![p("b.ts")]);
        context.dependency_graph.insert(p("b.ts"), vec![]);
        context.reverse_dependencies.insert(p("b.ts"), vec![p("a.ts")]);

        let result = analyze_graph(&context);
        assert_eq!(result.get_level(&p("b.ts")), 0);
        assert_eq!(result.get_level(&p("a.ts")), 1);
        assert!(!result.is_in_cycle(&p("a.ts")));
    }

    #[test]
    fn high_impact_summary_flags_many_dependents() {
        let mut context = DependencyContext::default();
        let many: Vec<PathBuf> = (0..20).map(|i| p(&format!("f{i}.ts"))).collect();
        context.reverse_dependencies.insert(p("shared.ts"), many);
        let analysis = analyze_graph(&context);
        let summary = high_impact_summary(&context, &analysis);
        assert!(summary.files.contains(&p("shared.ts")));
    }

    #[test]
    fn render_markdown_includes_cycle_and_level_sections() {
        let mut context = DependencyContext::default();
        context.dependency_graph.insert(p("a.ts"), vec![p("b.ts")]);
        context.dependency_graph.insert(p("b.ts"), vec![p("a.ts")]);
        let analysis = analyze_graph(&context);
        let summary = high_impact_summary(&context, &analysis);
        let markdown = render_markdown(&analysis, &summary);
        assert!(markdown.contains("Cycles detected: 1"));
        assert!(markdown.contains("Topological levels"));
    }
}
