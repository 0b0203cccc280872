//! Loop metadata for the linear IR.

use std::collections::BTreeMap;

use crate::expr::{ExprPort, LoopId};

/// One boundary-crossing port of a loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopPort {
    pub port: ExprPort,
    /// Innermost-relative dimension this loop iterates at this port.
    pub dim_idx: usize,
}

/// Port-based description of one loop.
///
/// Input ports are consumer-side ports fed from outside the loop; output
/// ports are producer-side ports read from outside. A loop whose two
/// port sets are both empty carries no dataflow and must be deleted.
#[derive(Clone, Debug)]
pub struct UnifiedLoopInfo {
    pub input_ports: Vec<LoopPort>,
    pub output_ports: Vec<LoopPort>,
    /// Nesting depth this loop iterates, innermost-relative.
    pub dim_idx: usize,
}

impl UnifiedLoopInfo {
    pub fn new(dim_idx: usize) -> Self {
        Self {
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            dim_idx,
        }
    }

    pub fn is_input_port(&self, port: &ExprPort) -> bool {
        self.input_ports.iter().any(|lp| lp.port == *port)
    }

    pub fn is_output_port(&self, port: &ExprPort) -> bool {
        self.output_ports.iter().any(|lp| lp.port == *port)
    }

    /// The loop-port record for a consumer-side port.
    ///
    /// # Panics
    ///
    /// Panics if the port is not a loop input port.
    pub fn input_port(&self, port: &ExprPort) -> &LoopPort {
        self.input_ports
            .iter()
            .find(|lp| lp.port == *port)
            .expect("not a loop input port")
    }

    /// Replaces the given input ports with new ones at this loop's depth.
    /// Duplicates among the additions are dropped.
    pub fn update_input_ports(&mut self, removed: &[ExprPort], added: &[ExprPort]) {
        self.input_ports.retain(|lp| !removed.contains(&lp.port));
        let dim_idx = self.dim_idx;
        for &port in added {
            if !self.is_input_port(&port) {
                self.input_ports.push(LoopPort { port, dim_idx });
            }
        }
    }

    pub fn remove_output_ports(&mut self, removed: &[ExprPort]) {
        self.output_ports.retain(|lp| !removed.contains(&lp.port));
    }

    pub fn is_dead(&self) -> bool {
        self.input_ports.is_empty() && self.output_ports.is_empty()
    }
}

/// Registry of live loops, keyed by id.
#[derive(Debug, Default)]
pub struct LoopManager {
    map: BTreeMap<LoopId, UnifiedLoopInfo>,
    next: u32,
}

impl LoopManager {
    pub fn add_loop(&mut self, info: UnifiedLoopInfo) -> LoopId {
        let id = LoopId(self.next);
        self.next += 1;
        self.map.insert(id, info);
        id
    }

    pub fn get(&self, id: LoopId) -> &UnifiedLoopInfo {
        self.map.get(&id).unwrap_or_else(|| panic!("unknown {id}"))
    }

    pub fn get_mut(&mut self, id: LoopId) -> &mut UnifiedLoopInfo {
        self.map.get_mut(&id).unwrap_or_else(|| panic!("unknown {id}"))
    }

    pub fn contains(&self, id: LoopId) -> bool {
        self.map.contains_key(&id)
    }

    /// Deletes a dead loop's record.
    pub fn remove_loop_info(&mut self, id: LoopId) {
        let removed = self.map.remove(&id);
        assert!(removed.is_some(), "removing unknown {id}");
    }

    pub fn map(&self) -> &BTreeMap<LoopId, UnifiedLoopInfo> {
        &self.map
    }
}
