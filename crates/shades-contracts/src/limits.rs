use std::collections::HashMap;

use chrono::NaiveDate;

/// Daily reply caps. `None` disables a cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyCaps {
    pub per_user: Option<u32>,
    pub global: Option<u32>,
}

impl DailyCaps {
    pub fn is_unbounded(&self) -> bool {
        self.per_user.is_none() && self.global.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapHit {
    Global { count: u32, cap: u32 },
    PerUser { username: String, count: u32, cap: u32 },
}

/// Per-username and global reply counters for the current calendar day.
///
/// Counters reset lazily: the first check on a date strictly after the stored
/// reset date zeroes them. A clock that moves backwards never resets.
#[derive(Debug, Clone)]
pub struct RateLimitCounters {
    per_user: HashMap<String, u32>,
    global: u32,
    reset_date: NaiveDate,
}

impl RateLimitCounters {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            per_user: HashMap::new(),
            global: 0,
            reset_date: today,
        }
    }

    pub fn reset_date(&self) -> NaiveDate {
        self.reset_date
    }

    pub fn global_count(&self) -> u32 {
        self.global
    }

    pub fn user_count(&self, username: &str) -> u32 {
        self.per_user
            .get(&counter_key(username))
            .copied()
            .unwrap_or(0)
    }

    /// Zeroes the counters if `today` is past the stored reset date.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today <= self.reset_date {
            return false;
        }
        self.per_user.clear();
        self.global = 0;
        self.reset_date = today;
        true
    }

    /// Returns the first cap already reached, global before per-user.
    pub fn check(&mut self, username: &str, caps: &DailyCaps, today: NaiveDate) -> Option<CapHit> {
        self.roll_over(today);
        if let Some(cap) = caps.global {
            if self.global >= cap {
                return Some(CapHit::Global {
                    count: self.global,
                    cap,
                });
            }
        }
        if let Some(cap) = caps.per_user {
            let count = self.user_count(username);
            if count >= cap {
                return Some(CapHit::PerUser {
                    username: username.to_string(),
                    count,
                    cap,
                });
            }
        }
        None
    }

    pub fn increment(&mut self, username: &str, today: NaiveDate) {
        self.roll_over(today);
        *self.per_user.entry(counter_key(username)).or_insert(0) += 1;
        self.global += 1;
    }
}

fn counter_key(username: &str) -> String {
    username.trim().trim_start_matches('@').to_ascii_lowercase()
}
