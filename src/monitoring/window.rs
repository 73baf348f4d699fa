use std::collections::VecDeque;
use std::time::Duration;
use crate::types::timestamp::Timestamp;

/// Time-ordered buffer bounded both by entry count and by entry age.
#[derive(Clone, Debug)]
pub struct RollingWindow<T> {
    max_age: Duration,
    capacity: usize,
    entries: VecDeque<(Timestamp, T)>,
}

impl<T> RollingWindow<T> {
    pub fn new(max_age: Duration, capacity: usize) -> Self {
        RollingWindow {
            max_age,
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Appends an entry, evicting the oldest when full and anything older than
    /// `max_age` relative to `at`.
    pub fn push(&mut self, at: Timestamp, value: T) {
        self.prune(at);
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((at, value));
    }

    pub fn prune(&mut self, now: Timestamp) {
        self.prune_older_than(now, self.max_age);
    }

    pub fn prune_older_than(&mut self, now: Timestamp, max_age: Duration) {
        let cutoff = now.saturating_sub(max_age);
        while let Some((front, _)) = self.entries.front() {
            if *front < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn last(&self) -> Option<(Timestamp, &T)> {
        self.entries.back().map(|(ts, v)| (*ts, v))
    }

    /// Entries stamped at or after `since`, oldest first.
    pub fn since(&self, since: Timestamp) -> impl Iterator<Item = &(Timestamp, T)> {
        self.entries.iter().filter(move |(ts, _)| *ts >= since)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_by_capacity() {
        let mut window = RollingWindow::new(Duration::from_secs(3600), 2);
        window.push(Timestamp::from_secs(1), 'a');
        window.push(Timestamp::from_secs(2), 'b');
        window.push(Timestamp::from_secs(3), 'c');
        assert_eq!(window.len(), 2);
        assert_eq!(window.since(Timestamp::from_secs(0)).map(|(_, v)| *v).collect::<String>(), "bc");
    }

    #[test]
    fn evicts_by_age_on_push() {
        let mut window = RollingWindow::new(Duration::from_secs(60), 10);
        window.push(Timestamp::from_secs(100), 1);
        window.push(Timestamp::from_secs(150), 2);
        window.push(Timestamp::from_secs(200), 3);
        assert_eq!(window.len(), 2);
        assert_eq!(window.last(), Some((Timestamp::from_secs(200), &3)));
    }
}
