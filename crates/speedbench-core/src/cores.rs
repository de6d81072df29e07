//! Core prioritization for hybrid CPUs
//!
//! The sweep grows parallelism one logical core at a time, in a fixed order:
//! physical performance cores first, then efficiency cores, then the SMT
//! siblings of the performance cores. The table is hardware-specific data;
//! [`physical_p_cores`] only reads the host's P-core count from sysfs so it can
//! be checked against the table.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Logical CPUs backed by P-cores on Linux hybrid systems
pub const P_CORE_CPU_LIST: &str = "/sys/devices/cpu_core/cpus";

/// Kind of logical core on a hybrid CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreKind {
    /// First hardware thread of a P-core
    PerformancePhysical,
    /// E-core (no SMT)
    Efficiency,
    /// SMT sibling of a P-core
    PerformanceSmt,
}

impl CoreKind {
    /// Short label for tables
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            CoreKind::PerformancePhysical => "P",
            CoreKind::Efficiency => "E",
            CoreKind::PerformanceSmt => "P-SMT",
        }
    }
}

/// Logical core layout of a hybrid CPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreTopology {
    /// P-core physical threads
    pub performance: Vec<usize>,
    /// E-cores
    pub efficiency: Vec<usize>,
    /// P-core SMT siblings
    pub performance_smt: Vec<usize>,
}

impl CoreTopology {
    /// i7-14700K: 8 P-cores with SMT, 12 E-cores
    #[must_use]
    pub fn i7_14700k() -> Self {
        Self {
            performance: vec![0, 2, 4, 6, 8, 10, 12, 14],
            efficiency: (16..28).collect(),
            performance_smt: vec![1, 3, 5, 7, 9, 11, 13, 15],
        }
    }

    /// All cores in priority order
    pub fn priority_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.performance
            .iter()
            .chain(&self.efficiency)
            .chain(&self.performance_smt)
            .copied()
    }

    /// Total logical cores
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.performance.len() + self.efficiency.len() + self.performance_smt.len()
    }

    /// Whether the topology lists no cores
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Core sets of size `1..=min(max_cores, len)`, each a prefix of the priority order
    #[must_use]
    pub fn prioritized_cores(&self, max_cores: usize) -> Vec<Vec<usize>> {
        let order: Vec<usize> = self.priority_order().collect();
        (1..=max_cores.min(order.len()))
            .map(|n| order[..n].to_vec())
            .collect()
    }

    /// Classify a logical core id
    #[must_use]
    pub fn kind_of(&self, core_id: usize) -> Option<CoreKind> {
        if self.performance.contains(&core_id) {
            Some(CoreKind::PerformancePhysical)
        } else if self.efficiency.contains(&core_id) {
            Some(CoreKind::Efficiency)
        } else if self.performance_smt.contains(&core_id) {
            Some(CoreKind::PerformanceSmt)
        } else {
            None
        }
    }
}

impl Default for CoreTopology {
    fn default() -> Self {
        Self::i7_14700k()
    }
}

/// Prioritized core sets on the default topology
#[must_use]
pub fn prioritized_cores(max_cores: usize) -> Vec<Vec<usize>> {
    CoreTopology::default().prioritized_cores(max_cores)
}

/// Number of CPUs in a kernel cpu list such as `0-15` or `0,2,4-7`
#[must_use]
pub fn count_cpu_list(text: &str) -> Option<usize> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.split(',')
        .map(|part| match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: usize = lo.trim().parse().ok()?;
                let hi: usize = hi.trim().parse().ok()?;
                (hi >= lo).then(|| hi - lo + 1)
            }
            None => part.trim().parse::<usize>().ok().map(|_| 1),
        })
        .sum()
}

/// Physical P-cores on this host, assuming two threads per P-core
///
/// `None` when the host does not expose a hybrid P-core list.
#[must_use]
pub fn physical_p_cores() -> Option<usize> {
    physical_p_cores_from(Path::new(P_CORE_CPU_LIST))
}

/// [`physical_p_cores`] against a specific cpu list file
#[must_use]
pub fn physical_p_cores_from(path: &Path) -> Option<usize> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "no P-core cpu list");
            return None;
        }
    };
    count_cpu_list(&text).map(|logical| logical / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_three_are_physical_p_cores() {
        assert_eq!(prioritized_cores(3), vec![vec![0], vec![0, 2], vec![0, 2, 4]]);
    }

    #[test]
    fn e_cores_follow_p_cores() {
        let sets = prioritized_cores(10);
        assert_eq!(sets[8], vec![0, 2, 4, 6, 8, 10, 12, 14, 16]);
        assert_eq!(sets[9].last(), Some(&17));
    }

    #[test]
    fn smt_siblings_come_last() {
        let sets = prioritized_cores(28);
        assert_eq!(sets.len(), 28);
        assert_eq!(sets[20].last(), Some(&1));
        assert_eq!(sets[27].last(), Some(&15));
    }

    #[test]
    fn capped_at_topology_size() {
        assert_eq!(prioritized_cores(100).len(), 28);
        assert!(prioritized_cores(0).is_empty());
    }

    #[test]
    fn classification() {
        let topo = CoreTopology::i7_14700k();
        assert_eq!(topo.kind_of(4), Some(CoreKind::PerformancePhysical));
        assert_eq!(topo.kind_of(20), Some(CoreKind::Efficiency));
        assert_eq!(topo.kind_of(7), Some(CoreKind::PerformanceSmt));
        assert_eq!(topo.kind_of(64), None);
    }

    #[test]
    fn cpu_list_ranges_and_singles() {
        assert_eq!(count_cpu_list("0-15\n"), Some(16));
        assert_eq!(count_cpu_list("0,1,2,3"), Some(4));
        assert_eq!(count_cpu_list("0-3,8,10-11"), Some(7));
        assert_eq!(count_cpu_list(""), None);
        assert_eq!(count_cpu_list("3-1"), None);
        assert_eq!(count_cpu_list("a-b"), None);
    }

    #[test]
    fn p_cores_from_cpu_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpus");
        std::fs::write(&path, "0-15\n").unwrap();
        assert_eq!(physical_p_cores_from(&path), Some(8));
        assert_eq!(physical_p_cores_from(&dir.path().join("missing")), None);
    }
}
