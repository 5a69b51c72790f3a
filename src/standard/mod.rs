//! Standard port-map validation (§4.I): checks that a calibration standard's declared port map
//! is a valid injective mapping from its own logical ports onto the VNA's physical ports, and
//! that the set of standards measured so far provides enough connectivity between physical ports
//! for the solver to relate every pair of them.

use crate::error::VnaError;
use std::collections::HashSet;

/// One standard's declared port map: `ports[i]` is the physical VNA port connected to the
/// standard's logical port `i`.
#[derive(Debug, Clone)]
pub struct PortMap {
    pub ports: Vec<usize>,
}

impl PortMap {
    pub fn new(ports: Vec<usize>) -> Result<Self, VnaError> {
        if ports.is_empty() {
            return Err(VnaError::usage("standard port map must name at least one port"));
        }
        let mut seen = HashSet::new();
        for &p in &ports {
            if !seen.insert(p) {
                return Err(VnaError::usage(format!(
                    "standard port map references physical port {} more than once",
                    p
                )));
            }
        }
        Ok(PortMap { ports })
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Validates that every named physical port is within `[0, system_ports)`.
    pub fn validate_against(&self, system_ports: usize) -> Result<(), VnaError> {
        for &p in &self.ports {
            if p >= system_ports {
                return Err(VnaError::usage(format!(
                    "standard port map references physical port {} but the system has only {} ports",
                    p, system_ports
                )));
            }
        }
        Ok(())
    }
}

/// Tracks which pairs of physical ports have been connected by at least one measured standard,
/// and answers whether every port pair is (transitively) connected — the condition a calibration
/// must satisfy before it has enough equations to solve for every off-diagonal error term.
#[derive(Debug, Clone)]
pub struct Connectivity {
    system_ports: usize,
    /// Union-find parent array; `find` gives each port's connectivity-class representative.
    parent: Vec<usize>,
}

impl Connectivity {
    pub fn new(system_ports: usize) -> Self {
        Connectivity {
            system_ports,
            parent: (0..system_ports).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }

    /// Records that `map` was measured, connecting every pair of physical ports it touches.
    pub fn record(&mut self, map: &PortMap) -> Result<(), VnaError> {
        map.validate_against(self.system_ports)?;
        for w in map.ports.windows(2) {
            self.union(w[0], w[1]);
        }
        // A single-port standard still needs its own port registered; `union` above is a no-op
        // for len==1 maps, which is fine since `find` already reflects each port's own class.
        Ok(())
    }

    /// True once every physical port belongs to the same connectivity class (transitive closure
    /// of every measured standard's port map).
    pub fn is_fully_connected(&mut self) -> bool {
        if self.system_ports <= 1 {
            return true;
        }
        let root = self.find(0);
        (1..self.system_ports).all(|p| self.find(p) == root)
    }

    /// Lists the physical ports not yet connected to port 0's class, for diagnostic messages.
    pub fn disconnected_ports(&mut self) -> Vec<usize> {
        if self.system_ports == 0 {
            return Vec::new();
        }
        let root = self.find(0);
        (1..self.system_ports).filter(|&p| self.find(p) != root).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_map_rejects_duplicate_ports() {
        assert!(PortMap::new(vec![0, 0]).is_err());
    }

    #[test]
    fn port_map_rejects_out_of_range() {
        let map = PortMap::new(vec![0, 5]).unwrap();
        assert!(map.validate_against(2).is_err());
    }

    #[test]
    fn connectivity_requires_bridging_standard() {
        let mut conn = Connectivity::new(3);
        conn.record(&PortMap::new(vec![0]).unwrap()).unwrap();
        conn.record(&PortMap::new(vec![1]).unwrap()).unwrap();
        conn.record(&PortMap::new(vec![2]).unwrap()).unwrap();
        assert!(!conn.is_fully_connected());
        assert_eq!(conn.disconnected_ports(), vec![1, 2]);

        conn.record(&PortMap::new(vec![0, 1]).unwrap()).unwrap();
        conn.record(&PortMap::new(vec![1, 2]).unwrap()).unwrap();
        assert!(conn.is_fully_connected());
    }

    #[test]
    fn single_port_system_is_trivially_connected() {
        let mut conn = Connectivity::new(1);
        assert!(conn.is_fully_connected());
    }
}
