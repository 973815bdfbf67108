/// Retransmission timer driven purely by elapsed-time ticks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RetransmissionTimer {
    #[default]
    Stopped,
    Running {
        remaining: u64,
        expired: bool,
    },
}

impl RetransmissionTimer {
    /// (Re)arms the timer to fire after `timeout` milliseconds.
    pub fn start(&mut self, timeout: u64) {
        *self = Self::Running {
            remaining: timeout,
            expired: false,
        };
    }

    pub fn stop(&mut self) {
        *self = Self::Stopped;
    }

    pub fn tick(&mut self, ms_since_last_tick: u64) {
        if let Self::Running { remaining, expired } = self {
            if ms_since_last_tick >= *remaining {
                *expired = true;
            } else {
                *remaining -= ms_since_last_tick;
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Running { expired: true, .. })
    }
}
