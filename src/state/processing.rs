//! Leader and assignment bookkeeping shared by Query and Active.

use super::{State, StateCore};
use crate::assignments::{rebalance, BucketAssignments};
use crate::error::{Result, StateError};
use crate::manager::Context;
use crate::message::{Identification, Leader};
use crate::types::Host;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// State that knows a leader and possibly a set of assignments.
#[derive(Debug)]
pub struct Processing {
    core: StateCore,
    leader: Host,
    assignments: Option<Arc<BucketAssignments>>,
}

impl Processing {
    pub fn new(ctx: Context, leader: impl Into<Host>, assignments: Option<Arc<BucketAssignments>>) -> Self {
        Self {
            core: StateCore::new(ctx),
            leader: leader.into(),
            assignments,
        }
    }

    pub fn core(&self) -> &StateCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    pub fn host(&self) -> &str {
        self.core.host()
    }

    pub fn leader(&self) -> &str {
        &self.leader
    }

    pub fn set_leader(&mut self, leader: impl Into<Host>) {
        self.leader = leader.into();
    }

    /// Whether this node believes it is the leader.
    pub fn is_leader(&self) -> bool {
        self.leader == self.core.host()
    }

    pub fn assignments(&self) -> Option<&Arc<BucketAssignments>> {
        self.assignments.as_ref()
    }

    pub fn set_assignments(&mut self, assignments: Option<Arc<BucketAssignments>>) {
        self.assignments = assignments;
    }

    /// Whether this node owns a bucket in the current assignments.
    pub fn has_assignment(&self) -> bool {
        self.assignments
            .as_ref()
            .map_or(false, |asgn| asgn.has_assignment(self.core.host()))
    }

    /// Announce this node and what it knows on the admin channel.
    pub fn publish_identification(&self) {
        self.core
            .publish_admin(Identification::new(self.host(), self.assignments.clone()));
    }

    /// Take over: rebalance across `alive`, announce the result and go Active.
    ///
    /// This node must be the lowest of `alive`.
    pub fn become_leader(&mut self, alive: &BTreeSet<Host>) -> Result<State> {
        let first = alive.iter().next();
        if first.map(String::as_str) != Some(self.core.host()) {
            return Err(StateError::NotFirstAlive {
                host: self.core.host().to_string(),
                first: first.cloned(),
            }
            .into());
        }

        let max_buckets = self.core.properties().max_buckets;
        let assignments = Arc::new(rebalance(self.assignments.as_deref(), alive, max_buckets));

        info!(
            host = %self.core.host(),
            alive = alive.len(),
            buckets = assignments.len(),
            "Becoming leader"
        );

        self.leader = self.core.host().to_string();
        self.assignments = Some(assignments.clone());
        self.core
            .publish_admin(Leader::new(self.core.host(), assignments.clone()));

        Ok(self.core.go_active(assignments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::Message;
    use crate::testing::{RecordingManager, HOST1, HOST2, MY_HOST};
    use crate::types::ADMIN_CHANNEL;

    fn alive(hosts: &[&str]) -> BTreeSet<Host> {
        hosts.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_is_leader() {
        let mgr = RecordingManager::new(MY_HOST);
        let mut processing = Processing::new(mgr.ctx(), HOST1, None);
        assert!(!processing.is_leader());

        processing.set_leader(MY_HOST);
        assert!(processing.is_leader());
    }

    #[test]
    fn test_has_assignment() {
        let mgr = RecordingManager::new(MY_HOST);
        let mut processing = Processing::new(mgr.ctx(), MY_HOST, None);
        assert!(!processing.has_assignment());

        processing.set_assignments(Some(Arc::new(BucketAssignments::from_hosts([HOST1]))));
        assert!(!processing.has_assignment());

        processing.set_assignments(Some(Arc::new(BucketAssignments::from_hosts([HOST1, MY_HOST]))));
        assert!(processing.has_assignment());
    }

    #[test]
    fn test_become_leader_fresh() {
        let mgr = RecordingManager::new(MY_HOST);
        let mut processing = Processing::new(mgr.ctx(), MY_HOST, None);

        let next = processing.become_leader(&alive(&[MY_HOST, HOST1])).unwrap();
        assert_eq!(next.name(), "active");

        let asgn = next.assignments().unwrap().clone();
        assert_eq!(asgn.len(), mgr.properties_ref().max_buckets);
        let counts = asgn.bucket_counts();
        assert_eq!(counts.len(), 2);
        assert!(counts.values().max().unwrap() - counts.values().min().unwrap() <= 1);

        let leaders = mgr.published_of("Leader");
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].0, ADMIN_CHANNEL);
        match &leaders[0].1 {
            Message::Leader(leader) => assert_eq!(leader.assignments.as_ref(), Some(&asgn)),
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(mgr.transitions(), vec!["go_active"]);
    }

    #[test]
    fn test_become_leader_requires_first_alive() {
        let mgr = RecordingManager::new(HOST2);
        let mut processing = Processing::new(mgr.ctx(), HOST2, None);

        let err = processing.become_leader(&alive(&[HOST1, HOST2])).unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError::NotFirstAlive { ref first, .. }) if first.as_deref() == Some(HOST1)
        ));
        assert!(mgr.published().is_empty());
        assert!(mgr.transitions().is_empty());
    }

    #[test]
    fn test_publish_identification() {
        let mgr = RecordingManager::new(MY_HOST);
        let asgn = Arc::new(BucketAssignments::from_hosts([MY_HOST]));
        let processing = Processing::new(mgr.ctx(), MY_HOST, Some(asgn.clone()));

        processing.publish_identification();
        let idents = mgr.published_of("Identification");
        assert_eq!(idents.len(), 1);
        match &idents[0].1 {
            Message::Identification(ident) => {
                assert_eq!(ident.source, MY_HOST);
                assert_eq!(ident.assignments.as_ref(), Some(&asgn));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
