//! Resource aggregation across the pods of a node
//!
//! Pure functions with no I/O. Results depend only on the set of pods, not on
//! the order they are listed in.

use crate::models::{NodeSnapshot, PodSnapshot};
use crate::quantity::{add_resources, ResourceList};
use tracing::warn;

/// Summed requests and limits of a group of pods
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodTotals {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

/// Every quantity reported for one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeUsage {
    pub pod_requests: ResourceList,
    pub pod_limits: ResourceList,
    pub daemon_requests: ResourceList,
    pub daemon_limits: ResourceList,
    pub overhead: ResourceList,
    pub allocatable: ResourceList,
}

/// Sum container requests and limits plus pod overhead
///
/// Terminal pods are skipped. Overhead always adds to requests. It adds to a
/// limit only when the summed container limits of the group are strictly
/// positive for that resource, so overhead alone never creates a limit.
pub fn pods_total<'a>(pods: impl IntoIterator<Item = &'a PodSnapshot>) -> PodTotals {
    let mut totals = PodTotals::default();
    let mut overhead = ResourceList::new();

    for pod in pods.into_iter().filter(|pod| !pod.is_terminal()) {
        for container in &pod.containers {
            add_resources(&mut totals.requests, &container.requests);
            add_resources(&mut totals.limits, &container.limits);
        }
        if let Some(pod_overhead) = &pod.overhead {
            add_resources(&mut overhead, pod_overhead);
        }
    }

    add_resources(&mut totals.requests, &overhead);
    for (name, quantity) in overhead {
        if let Some(limit) = totals.limits.get_mut(&name) {
            if limit.is_positive() {
                *limit += quantity;
            }
        }
    }

    totals
}

/// Resources reserved for the host: `capacity - allocatable`
///
/// Only resources present in allocatable are reported. A resource whose
/// allocatable exceeds its capacity is reported as zero.
pub fn system_overhead(node: &NodeSnapshot) -> ResourceList {
    node.allocatable
        .iter()
        .map(|(name, allocatable)| {
            let capacity = node.capacity.get(name).copied().unwrap_or_default();
            if capacity < *allocatable {
                warn!(
                    node = %node.name,
                    resource = %name,
                    capacity = %capacity,
                    allocatable = %allocatable,
                    "Allocatable exceeds capacity, clamping overhead to zero"
                );
            }
            (name.clone(), capacity.saturating_sub_floor(*allocatable))
        })
        .collect()
}

/// Allocatable resources, falling back to capacity when none are reported
pub fn effective_allocatable(node: &NodeSnapshot) -> ResourceList {
    if node.allocatable.is_empty() {
        node.capacity.clone()
    } else {
        node.allocatable.clone()
    }
}

/// Compute every reported quantity for a node and the pods bound to it
pub fn summarize_node(node: &NodeSnapshot, pods: &[PodSnapshot]) -> NodeUsage {
    let (daemons, workloads): (Vec<&PodSnapshot>, Vec<&PodSnapshot>) =
        pods.iter().partition(|pod| pod.is_daemon_owned());

    let pod_totals = pods_total(workloads);
    let daemon_totals = pods_total(daemons);

    NodeUsage {
        pod_requests: pod_totals.requests,
        pod_limits: pod_totals.limits,
        daemon_requests: daemon_totals.requests,
        daemon_limits: daemon_totals.limits,
        overhead: system_overhead(node),
        allocatable: effective_allocatable(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerResources, OwnerReference, PodPhase};
    use crate::quantity::Quantity;

    fn resources(entries: &[(&str, &str)]) -> ResourceList {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.parse::<Quantity>().unwrap()))
            .collect()
    }

    fn pod(name: &str, requests: &[(&str, &str)], limits: &[(&str, &str)]) -> PodSnapshot {
        PodSnapshot {
            name: name.into(),
            namespace: "default".into(),
            phase: PodPhase::Running,
            containers: vec![ContainerResources {
                requests: resources(requests),
                limits: resources(limits),
            }],
            ..Default::default()
        }
    }

    fn daemon(mut pod: PodSnapshot) -> PodSnapshot {
        pod.owners.push(OwnerReference {
            api_version: "apps/v1".into(),
            kind: "DaemonSet".into(),
            name: "agent".into(),
            controller: true,
        });
        pod
    }

    #[test]
    fn test_partitions_daemon_pods_independent_of_order() {
        let p1 = pod("p1", &[("cpu", "500m")], &[("cpu", "1")]);
        let p2 = daemon(pod("p2", &[("cpu", "100m")], &[]));
        let node = NodeSnapshot::default();

        let forward = summarize_node(&node, &[p1.clone(), p2.clone()]);
        let backward = summarize_node(&node, &[p2, p1]);

        assert_eq!(forward, backward);
        assert_eq!(forward.pod_requests["cpu"].as_reported("cpu"), 0.5);
        assert_eq!(forward.daemon_requests["cpu"].as_reported("cpu"), 0.1);
        assert!(forward.daemon_limits.is_empty());
    }

    #[test]
    fn test_terminal_pods_contribute_nothing() {
        let mut done = pod("done", &[("cpu", "4")], &[("cpu", "8")]);
        done.phase = PodPhase::Succeeded;
        done.overhead = Some(resources(&[("cpu", "1")]));
        let mut failed = pod("failed", &[("memory", "1Gi")], &[]);
        failed.phase = PodPhase::Failed;

        let totals = pods_total([&done, &failed]);
        assert!(totals.requests.is_empty());
        assert!(totals.limits.is_empty());
    }

    #[test]
    fn test_overhead_adds_to_requests_and_positive_limits_only() {
        let mut with_limit = pod("a", &[("cpu", "1")], &[("cpu", "2"), ("memory", "0")]);
        with_limit.overhead = Some(resources(&[("cpu", "250m"), ("memory", "64Mi")]));
        let mut no_limit = pod("b", &[("memory", "128Mi")], &[]);
        no_limit.overhead = Some(resources(&[("pods", "1")]));

        let totals = pods_total([&with_limit, &no_limit]);

        assert_eq!(totals.requests["cpu"], "1250m".parse().unwrap());
        assert_eq!(totals.requests["memory"], "192Mi".parse().unwrap());
        assert_eq!(totals.requests["pods"], "1".parse().unwrap());
        assert_eq!(totals.limits["cpu"], "2250m".parse().unwrap());
        // zero limit stays zero, absent limit stays absent
        assert_eq!(totals.limits["memory"], Quantity::ZERO);
        assert!(!totals.limits.contains_key("pods"));
    }

    #[test]
    fn test_overhead_to_limits_is_order_independent() {
        let mut overhead_only = pod("a", &[], &[]);
        overhead_only.overhead = Some(resources(&[("cpu", "100m")]));
        let limited = pod("b", &[], &[("cpu", "1")]);

        let forward = pods_total([&overhead_only, &limited]);
        let backward = pods_total([&limited, &overhead_only]);
        assert_eq!(forward, backward);
        assert_eq!(forward.limits["cpu"], "1100m".parse().unwrap());
    }

    #[test]
    fn test_system_overhead_is_clamped() {
        let node = NodeSnapshot {
            name: "n1".into(),
            capacity: resources(&[("cpu", "4"), ("memory", "1Gi"), ("pods", "110")]),
            allocatable: resources(&[("cpu", "3800m"), ("memory", "2Gi")]),
            ..Default::default()
        };

        let overhead = system_overhead(&node);
        assert_eq!(overhead["cpu"].as_reported("cpu"), 0.2);
        assert_eq!(overhead["memory"], Quantity::ZERO);
        assert!(!overhead.contains_key("pods"));
    }

    #[test]
    fn test_system_overhead_empty_without_allocatable() {
        let node = NodeSnapshot {
            capacity: resources(&[("cpu", "4")]),
            ..Default::default()
        };
        assert!(system_overhead(&node).is_empty());
        assert_eq!(effective_allocatable(&node), node.capacity);
    }
}
