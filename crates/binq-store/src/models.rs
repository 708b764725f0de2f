use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    pub name: String,
    pub max_partitions: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u64,
    pub queue_name: String,
    pub partition: u32,
    pub data: Vec<u8>,
    pub file_name: Option<String>,
    pub file_extension: Option<String>,
    pub lock_until: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A message is visible iff it hasn't been acked and any prior lock has
    /// expired. `now` is passed in rather than read here so callers (and
    /// tests) control the clock.
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.lock_until.map_or(true, |until| until <= now)
    }
}
