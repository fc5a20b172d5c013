//! Pure graph algorithms over milestone snapshots

use std::collections::{HashMap, HashSet};

use mergeflow_core::model::{Milestone, MilestoneState};
use mergeflow_core::OrchestrationError;

/// Topological sort of the milestone dependency graph
///
/// DFS with a temporary-mark set; revisiting a node in the temporary set
/// fails with a cycle error. The result orders every dependency before
/// its dependents, and is deterministic (roots visited in id order).
pub fn topo_sort(milestones: &[Milestone]) -> Result<Vec<String>, OrchestrationError> {
    let by_id: HashMap<&str, &Milestone> =
        milestones.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut ids: Vec<&str> = by_id.keys().copied().collect();
    ids.sort_unstable();

    let mut permanent: HashSet<&str> = HashSet::new();
    let mut temporary: HashSet<&str> = HashSet::new();
    let mut order: Vec<String> = Vec::with_capacity(milestones.len());

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Milestone>,
        permanent: &mut HashSet<&'a str>,
        temporary: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), OrchestrationError> {
        if permanent.contains(id) {
            return Ok(());
        }
        if !temporary.insert(id) {
            return Err(OrchestrationError::Validation(format!(
                "dependency cycle involving milestone '{id}'"
            )));
        }

        let milestone = by_id
            .get(id)
            .ok_or_else(|| OrchestrationError::Dependency(format!("milestone '{id}'")))?;

        let mut deps: Vec<&str> = milestone.dependencies.iter().map(String::as_str).collect();
        deps.sort_unstable();
        for dep in deps {
            visit(dep, by_id, permanent, temporary, order)?;
        }

        temporary.remove(id);
        permanent.insert(id);
        order.push(id.to_string());
        Ok(())
    }

    for id in ids {
        visit(id, &by_id, &mut permanent, &mut temporary, &mut order)?;
    }
    Ok(order)
}

/// Weighted longest root-to-leaf path (the critical path)
///
/// Node weight is `expected_completion_time` in milliseconds (0 when
/// unset). Distances start at −∞ except roots (their own weight), edges
/// are relaxed in topological order with predecessor tracking, and the
/// heaviest root-to-leaf path is reconstructed. Ties break by
/// lexicographic order of milestone ids; an empty graph yields an empty
/// path.
pub fn critical_path(milestones: &[Milestone]) -> Result<Vec<String>, OrchestrationError> {
    if milestones.is_empty() {
        return Ok(vec![]);
    }

    let order = topo_sort(milestones)?;
    let by_id: HashMap<&str, &Milestone> =
        milestones.iter().map(|m| (m.id.as_str(), m)).collect();

    let weight = |id: &str| -> f64 {
        by_id
            .get(id)
            .and_then(|m| m.expected_completion_time)
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0)
    };

    let mut dist: HashMap<&str, f64> = HashMap::new();
    let mut pred: HashMap<&str, &str> = HashMap::new();

    for id in &order {
        let id = id.as_str();
        let milestone = by_id[id];
        if milestone.dependencies.is_empty() {
            dist.insert(id, weight(id));
            continue;
        }

        let mut best = f64::NEG_INFINITY;
        let mut best_pred: Option<&str> = None;

        let mut deps: Vec<&str> = milestone.dependencies.iter().map(String::as_str).collect();
        deps.sort_unstable();
        for dep in deps {
            let Some(&dep_dist) = dist.get(dep) else {
                continue;
            };
            if dep_dist == f64::NEG_INFINITY {
                continue;
            }
            let candidate = dep_dist + weight(id);
            // Strictly-greater wins; the sorted iteration makes the
            // lexicographically smallest predecessor win ties
            if candidate > best {
                best = candidate;
                best_pred = Some(dep);
            }
        }

        dist.insert(id, best);
        if let Some(p) = best_pred {
            pred.insert(id, p);
        }
    }

    // Leaves: milestones no other milestone depends on
    let depended_on: HashSet<&str> = milestones
        .iter()
        .flat_map(|m| m.dependencies.iter().map(String::as_str))
        .collect();

    let mut best_leaf: Option<(&str, f64)> = None;
    let mut leaves: Vec<&str> = milestones
        .iter()
        .map(|m| m.id.as_str())
        .filter(|id| !depended_on.contains(id))
        .collect();
    leaves.sort_unstable();

    for leaf in leaves {
        let d = dist.get(leaf).copied().unwrap_or(f64::NEG_INFINITY);
        if d == f64::NEG_INFINITY {
            continue;
        }
        match best_leaf {
            Some((_, best)) if d <= best => {}
            _ => best_leaf = Some((leaf, d)),
        }
    }

    let Some((leaf, _)) = best_leaf else {
        return Ok(vec![]);
    };

    let mut path = vec![leaf.to_string()];
    let mut cursor = leaf;
    while let Some(&p) = pred.get(cursor) {
        path.push(p.to_string());
        cursor = p;
    }
    path.reverse();
    Ok(path)
}

/// Weighted workflow progress in `[0, 100]`
///
/// `Σ weight·progress / Σ weight · 100`, with progress 1 for completed,
/// `percent_complete/100` for in-progress, 0 otherwise. A zero total
/// weight yields 0.
pub fn workflow_progress(entries: &[(Milestone, MilestoneState)]) -> f64 {
    let total: f64 = entries.iter().map(|(m, _)| m.weight).sum();
    if total <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = entries
        .iter()
        .map(|(m, s)| m.weight * s.progress_fraction())
        .sum();
    (weighted / total) * 100.0
}

/// [`workflow_progress`] restricted to milestones on the critical path
pub fn critical_path_progress(
    entries: &[(Milestone, MilestoneState)],
) -> Result<f64, OrchestrationError> {
    let milestones: Vec<Milestone> = entries.iter().map(|(m, _)| m.clone()).collect();
    let path: HashSet<String> = critical_path(&milestones)?.into_iter().collect();

    let on_path: Vec<(Milestone, MilestoneState)> = entries
        .iter()
        .filter(|(m, _)| path.contains(&m.id))
        .cloned()
        .collect();
    Ok(workflow_progress(&on_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergeflow_core::model::MilestoneStatus;
    use std::time::Duration;

    fn milestone(id: &str, weight: f64, expected_ms: u64, deps: Vec<&str>) -> Milestone {
        let mut m = Milestone::new(id, id, "wf", weight).with_dependencies(deps);
        if expected_ms > 0 {
            m = m.with_expected_completion(Duration::from_millis(expected_ms));
        }
        m
    }

    fn state(status: MilestoneStatus, percent: f64) -> MilestoneState {
        MilestoneState {
            status,
            percent_complete: percent,
            ..Default::default()
        }
    }

    #[test]
    fn test_topo_sort_orders_dependencies_first() {
        let milestones = vec![
            milestone("c", 10.0, 0, vec!["b"]),
            milestone("a", 10.0, 0, vec![]),
            milestone("b", 10.0, 0, vec!["a"]),
        ];

        let order = topo_sort(&milestones).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topo_sort_detects_cycle() {
        let milestones = vec![
            milestone("a", 10.0, 0, vec!["b"]),
            milestone("b", 10.0, 0, vec!["a"]),
        ];

        let error = topo_sort(&milestones).unwrap_err();
        assert!(error.to_string().contains("cycle"));
    }

    #[test]
    fn test_critical_path_diamond() {
        // M1(100) -> M2(200) -> M4(50) beats M1(100) -> M3(150) -> M4(50)
        let milestones = vec![
            milestone("m1", 10.0, 100, vec![]),
            milestone("m2", 20.0, 200, vec!["m1"]),
            milestone("m3", 30.0, 150, vec!["m1"]),
            milestone("m4", 40.0, 50, vec!["m2", "m3"]),
        ];

        let path = critical_path(&milestones).unwrap();
        assert_eq!(path, vec!["m1", "m2", "m4"]);
    }

    #[test]
    fn test_critical_path_tie_breaks_lexicographically() {
        // Both branches weigh the same; the lexicographically smaller
        // predecessor must win
        let milestones = vec![
            milestone("root", 10.0, 100, vec![]),
            milestone("alpha", 10.0, 200, vec!["root"]),
            milestone("beta", 10.0, 200, vec!["root"]),
            milestone("tail", 10.0, 50, vec!["alpha", "beta"]),
        ];

        let path = critical_path(&milestones).unwrap();
        assert_eq!(path, vec!["root", "alpha", "tail"]);
    }

    #[test]
    fn test_critical_path_empty_graph() {
        assert!(critical_path(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_critical_path_single_node() {
        let milestones = vec![milestone("only", 10.0, 500, vec![])];
        assert_eq!(critical_path(&milestones).unwrap(), vec!["only"]);
    }

    #[test]
    fn test_critical_path_is_heaviest() {
        // The returned path must outweigh every other root-to-leaf
        // path; here the long chain beats the heavy single hop
        let milestones = vec![
            milestone("s", 10.0, 10, vec![]),
            milestone("x1", 10.0, 100, vec!["s"]),
            milestone("x2", 10.0, 100, vec!["x1"]),
            milestone("x3", 10.0, 100, vec!["x2"]),
            milestone("y", 10.0, 250, vec!["s"]),
            milestone("t", 10.0, 10, vec!["x3", "y"]),
        ];

        let path = critical_path(&milestones).unwrap();
        assert_eq!(path, vec!["s", "x1", "x2", "x3", "t"]);
    }

    #[test]
    fn test_workflow_progress_weighted() {
        let entries = vec![
            (milestone("a", 30.0, 0, vec![]), state(MilestoneStatus::Completed, 100.0)),
            (milestone("b", 50.0, 0, vec![]), state(MilestoneStatus::InProgress, 50.0)),
            (milestone("c", 20.0, 0, vec![]), state(MilestoneStatus::NotStarted, 0.0)),
        ];

        // (30*1 + 50*0.5 + 20*0) / 100 * 100 = 55
        let progress = workflow_progress(&entries);
        assert!((progress - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_workflow_progress_zero_weight() {
        let entries = vec![(
            milestone("a", 0.0, 0, vec![]),
            state(MilestoneStatus::Completed, 100.0),
        )];
        assert_eq!(workflow_progress(&entries), 0.0);
    }

    #[test]
    fn test_workflow_progress_bounds() {
        // Progress stays within [0, 100] and reaches 100 only when
        // every weighted milestone is fully complete
        let all_done = vec![
            (milestone("a", 40.0, 0, vec![]), state(MilestoneStatus::Completed, 100.0)),
            (milestone("b", 60.0, 0, vec![]), state(MilestoneStatus::InProgress, 100.0)),
        ];
        assert!((workflow_progress(&all_done) - 100.0).abs() < 1e-9);

        let partial = vec![
            (milestone("a", 40.0, 0, vec![]), state(MilestoneStatus::Completed, 100.0)),
            (milestone("b", 60.0, 0, vec![]), state(MilestoneStatus::Blocked, 99.0)),
        ];
        let progress = workflow_progress(&partial);
        assert!(progress < 100.0);
        assert!(progress >= 0.0);
    }

    #[test]
    fn test_critical_path_progress_restricts_to_path() {
        let entries = vec![
            (
                milestone("m1", 25.0, 100, vec![]),
                state(MilestoneStatus::Completed, 100.0),
            ),
            (
                milestone("m2", 25.0, 200, vec!["m1"]),
                state(MilestoneStatus::NotStarted, 0.0),
            ),
            // Off the critical path and completed; must not count
            (
                milestone("m3", 50.0, 10, vec!["m1"]),
                state(MilestoneStatus::Completed, 100.0),
            ),
        ];

        // Critical path is m1 -> m2 (300 > 110): progress = 25/50 * 100
        let progress = critical_path_progress(&entries).unwrap();
        assert!((progress - 50.0).abs() < 1e-9);
    }
}
