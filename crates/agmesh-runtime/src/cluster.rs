use agmesh_logic::RosterEntry;
use agmesh_types::ClusterDescriptor;
use std::sync::RwLock;

/// Shared view of a running cluster: its identity plus the live roster.
/// The roster changes only under the orchestrator (single writer); agents
/// read it when building script environments.
pub struct ClusterHandle {
    descriptor: ClusterDescriptor,
    roster: RwLock<Vec<RosterEntry>>,
}

impl ClusterHandle {
    pub fn new(descriptor: ClusterDescriptor) -> Self {
        Self {
            descriptor,
            roster: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn created_at(&self) -> i64 {
        self.descriptor.created_at
    }

    pub fn descriptor(&self) -> &ClusterDescriptor {
        &self.descriptor
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.roster.read().unwrap().clone()
    }

    pub fn add_agent(&self, id: impl Into<String>, role: impl Into<String>) {
        let mut roster = self.roster.write().unwrap();
        let id = id.into();
        if !roster.iter().any(|a| a.id == id) {
            roster.push(RosterEntry {
                id,
                role: role.into(),
            });
        }
    }

    pub fn remove_agent(&self, id: &str) {
        self.roster.write().unwrap().retain(|a| a.id != id);
    }

    pub fn agents_by_role(&self, role: &str) -> Vec<RosterEntry> {
        self.roster
            .read()
            .unwrap()
            .iter()
            .filter(|a| a.role == role)
            .cloned()
            .collect()
    }
}
