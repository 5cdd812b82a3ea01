use super::{StateCore, Transition};
use crate::manager::{Context, TimerKind};
use crate::message::{Filter, FIELD_CHANNEL};
use crate::types::UNKNOWN_CHANNEL;
use tracing::info;

/// Stood down: listens to nothing and restarts after the reactivation delay.
#[derive(Debug)]
pub struct InactiveState {
    core: StateCore,
}

impl InactiveState {
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

    pub fn start(&mut self) {
        let delay = self.core.properties().reactivate;
        info!(host = %self.core.host(), ?delay, "Inactive until reactivation");
        self.core.schedule(delay, TimerKind::Reactivate);
    }

    pub fn filter(&self) -> Filter {
        Filter::equals(FIELD_CHANNEL, UNKNOWN_CHANNEL)
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Transition {
        match kind {
            TimerKind::Reactivate => Some(self.core.go_start()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::manager::TimerKind;
    use crate::message::Query;
    use crate::state::{InactiveState, State};
    use crate::testing::{on_channel, RecordingManager, HOST1, MY_HOST};
    use crate::types::ADMIN_CHANNEL;

    #[test]
    fn test_reactivates_to_start() {
        let mgr = RecordingManager::new(MY_HOST);
        let mut state = mgr.factory_state(|ctx| State::Inactive(InactiveState::new(ctx)));
        state.start();
        assert_eq!(mgr.timer_kinds(), vec![TimerKind::Reactivate]);

        let id = mgr.timer_id(TimerKind::Reactivate).unwrap();
        let next = state.timer_fired(id).unwrap().unwrap();
        assert_eq!(next.name(), "start");
        assert_eq!(mgr.transitions(), vec!["go_start"]);
    }

    #[test]
    fn test_filter_matches_nothing_real() {
        let mgr = RecordingManager::new(MY_HOST);
        let state = mgr.factory_state(|ctx| State::Inactive(InactiveState::new(ctx)));
        let filter = state.filter();

        assert!(!filter.matches(&on_channel(Query::new(HOST1), ADMIN_CHANNEL)));
        assert!(!filter.matches(&on_channel(Query::new(HOST1), MY_HOST)));
    }
}
