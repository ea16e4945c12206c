use std::collections::HashMap;

use tokio::task::JoinHandle;

/// Teardown armed for a resource whose count dropped to zero.
pub(super) struct PendingTeardown {
    pub(super) generation: u64,
    pub(super) task: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub(super) struct ServiceNode {
    pub(super) edges: HashMap<String, usize>,
    pub(super) total: usize,
}

#[derive(Default)]
pub(super) struct ResourceNode {
    pub(super) edges: HashMap<String, usize>,
    pub(super) total: usize,
    pub(super) pending: Option<PendingTeardown>,
}

/// Outcome of dropping references on one resource.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Drained {
    /// The resource still has references
    Live,
    /// The resource reached zero references
    Zero(String),
}

/// Bipartite service ↔ resource reference graph.
///
/// Edge weights are kept on both endpoints together with per-node totals so
/// every count query is a single map lookup.
#[derive(Default)]
pub(super) struct Graph {
    pub(super) services: HashMap<String, ServiceNode>,
    pub(super) resources: HashMap<String, ResourceNode>,
}

impl Graph {
    /// Adds one reference; returns the cancelled teardown task, if any.
    pub(super) fn add(&mut self, service: &str, resource: &str) -> Option<PendingTeardown> {
        let service_node = self.services.entry(service.to_string()).or_default();
        *service_node.edges.entry(resource.to_string()).or_default() += 1;
        service_node.total += 1;

        let resource_node = self.resources.entry(resource.to_string()).or_default();
        *resource_node.edges.entry(service.to_string()).or_default() += 1;
        resource_node.total += 1;

        resource_node.pending.take()
    }

    /// Removes up to `count` references of one pair.
    pub(super) fn remove(&mut self, service: &str, resource: &str, count: usize) -> Option<Drained> {
        let service_node = self.services.get_mut(service)?;
        let weight = service_node.edges.get_mut(resource)?;
        let removed = count.min(*weight);

        *weight -= removed;
        if *weight == 0 {
            service_node.edges.remove(resource);
        }
        service_node.total -= removed;
        if service_node.edges.is_empty() {
            self.services.remove(service);
        }

        let resource_node = self.resources.get_mut(resource)?;
        if let Some(weight) = resource_node.edges.get_mut(service) {
            *weight -= removed.min(*weight);
            if *weight == 0 {
                resource_node.edges.remove(service);
            }
        }
        resource_node.total -= removed.min(resource_node.total);

        if resource_node.total == 0 {
            Some(Drained::Zero(resource.to_string()))
        } else {
            Some(Drained::Live)
        }
    }

    /// Removes a service and all its edges; returns the resources that reached zero.
    pub(super) fn remove_service(&mut self, service: &str) -> Vec<String> {
        let Some(node) = self.services.remove(service) else {
            return Vec::new();
        };

        let mut drained = Vec::new();
        for (resource, weight) in node.edges {
            let Some(resource_node) = self.resources.get_mut(&resource) else {
                continue;
            };

            resource_node.edges.remove(service);
            resource_node.total -= weight.min(resource_node.total);
            if resource_node.total == 0 {
                drained.push(resource);
            }
        }

        drained.sort();
        drained
    }

    pub(super) fn pair_weight(&self, service: &str, resource: &str) -> usize {
        self.services
            .get(service)
            .and_then(|node| node.edges.get(resource))
            .copied()
            .unwrap_or(0)
    }
}
