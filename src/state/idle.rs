use super::StateCore;
use crate::manager::Context;
use crate::message::{Filter, FIELD_CHANNEL};
use crate::types::ADMIN_CHANNEL;

/// Passive state of a node that has been shut down.
#[derive(Debug)]
pub struct IdleState {
    core: StateCore,
}

impl IdleState {
    pub fn new(ctx: Context) -> Self {
        Self {
            core: StateCore::new(ctx),
        }
    }

    pub(crate) fn core(&self) -> &StateCore {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut StateCore {
        &mut self.core
    }

    pub fn filter(&self) -> Filter {
        Filter::or(vec![
            Filter::equals(FIELD_CHANNEL, ADMIN_CHANNEL),
            Filter::equals(FIELD_CHANNEL, self.core.host()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use crate::message::{Heartbeat, Offline, Query};
    use crate::state::{IdleState, State};
    use crate::testing::{on_channel, RecordingManager, HOST1, MY_HOST};
    use crate::types::ADMIN_CHANNEL;

    #[test]
    fn test_idle_is_passive() {
        let mgr = RecordingManager::new(MY_HOST);
        let mut state = mgr.factory_state(|ctx| State::Idle(IdleState::new(ctx)));
        state.start();
        assert_eq!(state.timer_count(), 0);

        assert!(state.process(Query::new(HOST1).into()).unwrap().is_none());
        assert!(state.process(Offline::new(HOST1).into()).unwrap().is_none());
        assert!(state.process(Heartbeat::new(MY_HOST, 1).into()).unwrap().is_none());
        assert!(mgr.published().is_empty());
    }

    #[test]
    fn test_filter() {
        let mgr = RecordingManager::new(MY_HOST);
        let state = mgr.factory_state(|ctx| State::Idle(IdleState::new(ctx)));
        let filter = state.filter();

        assert!(filter.matches(&on_channel(Query::new(HOST1), ADMIN_CHANNEL)));
        assert!(filter.matches(&on_channel(Heartbeat::new(HOST1, 1), MY_HOST)));
        assert!(!filter.matches(&on_channel(Heartbeat::new(HOST1, 1), HOST1)));
    }
}
