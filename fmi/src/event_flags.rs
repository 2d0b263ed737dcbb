/// Event information returned from `new_discrete_states` (`fmi3EventInfo`).
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct EventFlags {
    /// The importer must stay in Event Mode and call `new_discrete_states` again.
    pub discrete_states_need_update: bool,
    /// The unit requests to stop the simulation and the importer must call `terminate()`.
    pub terminate_simulation: bool,
    /// At least one nominal value of the states has changed and can be inquired with
    /// [`crate::fmi3::ModelExchange::get_nominals_of_continuous_states()`]. Only valid in
    /// Model Exchange.
    pub nominals_of_continuous_states_changed: bool,
    /// At least one continuous state has changed its value because it was re-initialized.
    pub values_of_continuous_states_changed: bool,
    /// The absolute time of the next time event. The importer must compute up to
    /// `next_event_time` (or if needed slightly further) and then enter Event Mode.
    pub next_event_time: Option<f64>,
}

impl EventFlags {
    /// Reset all event flags to their default state.
    pub fn reset(&mut self) {
        self.discrete_states_need_update = false;
        self.terminate_simulation = false;
        self.nominals_of_continuous_states_changed = false;
        self.values_of_continuous_states_changed = false;
        self.next_event_time = None;
    }

    /// Combine the flags of one event iteration into the accumulated flags of an event.
    ///
    /// The change flags are sticky, while `discrete_states_need_update` and `next_event_time`
    /// always reflect the latest iteration.
    pub fn accumulate(&mut self, other: &EventFlags) {
        self.discrete_states_need_update = other.discrete_states_need_update;
        self.terminate_simulation |= other.terminate_simulation;
        self.nominals_of_continuous_states_changed |= other.nominals_of_continuous_states_changed;
        self.values_of_continuous_states_changed |= other.values_of_continuous_states_changed;
        self.next_event_time = other.next_event_time;
    }
}

#[cfg(test)]
mod tests {
    use super::EventFlags;

    #[test]
    fn accumulate_keeps_sticky_flags() {
        let mut total = EventFlags::default();
        total.accumulate(&EventFlags {
            discrete_states_need_update: true,
            values_of_continuous_states_changed: true,
            ..Default::default()
        });
        total.accumulate(&EventFlags {
            next_event_time: Some(1.5),
            ..Default::default()
        });
        assert!(!total.discrete_states_need_update);
        assert!(total.values_of_continuous_states_changed);
        assert_eq!(total.next_event_time, Some(1.5));

        total.reset();
        assert_eq!(total, EventFlags::default());
    }
}
