use std::hash::Hash;
use indexmap::IndexMap;
use indexmap::map::Entry;
use tokio::time::{Duration, Instant};

use crate::device::types::DiscoveredDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// First sighting; the device was appended at `index`.
    New { index: usize },
    /// A known device reported its name for the first time.
    Renamed { index: usize },
    Known,
    /// Reported while no scan session is running.
    Ignored,
}

/// State of a time bounded discovery session.
///
/// The scanner does not talk to the adapter itself: `start`, `stop` and
/// `poll_timeout` report whether the caller has to start or stop discovery.
/// Discovered devices are kept across sessions, in first-seen order.
#[derive(Debug)]
pub struct Scanner<Id> {
    period: Duration,
    deadline: Option<Instant>,
    devices: IndexMap<Id, DiscoveredDevice<Id>>,
}

impl<Id: Clone + Eq + Hash> Scanner<Id> {
    pub fn new(period: Duration) -> Self {
        Scanner {
            period,
            deadline: None,
            devices: IndexMap::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Applies to the next session, a running one keeps its deadline.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub fn is_scanning(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns false if a session is already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.is_scanning() {
            return false;
        }

        self.deadline = Some(now + self.period);
        true
    }

    /// Returns false if no session is running.
    pub fn stop(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Ends the session if its deadline has passed. Returns true if it did.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            },
            _ => false,
        }
    }

    pub fn on_discovered(&mut self, id: Id, name: Option<String>) -> Discovery {
        if !self.is_scanning() {
            return Discovery::Ignored;
        }

        let index = self.devices.len();
        match self.devices.entry(id) {
            Entry::Vacant(entry) => {
                let id = entry.key().clone();
                entry.insert(DiscoveredDevice { id, name });
                Discovery::New { index }
            },
            Entry::Occupied(mut entry) => {
                let index = entry.index();
                let device = entry.get_mut();

                if device.name.is_none() && name.is_some() {
                    device.name = name;
                    Discovery::Renamed { index }
                } else {
                    Discovery::Known
                }
            },
        }
    }

    pub fn device(&self, index: usize) -> Option<&DiscoveredDevice<Id>> {
        self.devices.get_index(index).map(|(_, device)| device)
    }

    /// The device at `index`, if it advertises exactly `target_name`.
    pub fn target_at(&self, index: usize, target_name: &str) -> Option<&DiscoveredDevice<Id>> {
        self.device(index).filter(|device| device.is_target(target_name))
    }

    pub fn position(&self, id: &Id) -> Option<usize> {
        self.devices.get_index_of(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DiscoveredDevice<Id>> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(10000);

    fn scanning() -> (Scanner<u32>, Instant) {
        let mut scanner = Scanner::new(PERIOD);
        let now = Instant::now();
        assert!(scanner.start(now));
        (scanner, now)
    }

    #[test]
    fn start_is_idempotent_while_scanning() {
        let (mut scanner, now) = scanning();

        assert!(!scanner.start(now + Duration::from_secs(3)));
        // the second start must not push the deadline back
        assert_eq!(scanner.deadline(), Some(now + PERIOD));
    }

    #[test]
    fn stop_is_idempotent_when_not_scanning() {
        let mut scanner: Scanner<u32> = Scanner::new(PERIOD);
        assert!(!scanner.stop());

        let (mut scanner, _) = scanning();
        assert!(scanner.stop());
        assert!(!scanner.stop());
        assert_eq!(scanner.deadline(), None);
    }

    #[test]
    fn stops_automatically_after_the_period() {
        let (mut scanner, now) = scanning();

        assert!(!scanner.poll_timeout(now + Duration::from_millis(9999)));
        assert!(scanner.is_scanning());

        assert!(scanner.poll_timeout(now + PERIOD));
        assert!(!scanner.is_scanning());

        // already stopped
        assert!(!scanner.poll_timeout(now + PERIOD * 2));
    }

    #[test]
    fn stopped_early_session_does_not_time_out() {
        let (mut scanner, now) = scanning();
        assert!(scanner.stop());
        assert!(!scanner.poll_timeout(now + PERIOD));
    }

    #[test]
    fn duplicates_are_suppressed_in_first_seen_order() {
        let (mut scanner, _) = scanning();

        let results: Vec<Discovery> = [(7, "A"), (3, "B"), (7, "A"), (9, "C"), (3, "B")]
            .into_iter()
            .map(|(id, name)| scanner.on_discovered(id, Some(name.to_string())))
            .collect();

        assert_eq!(results, vec![
            Discovery::New { index: 0 },
            Discovery::New { index: 1 },
            Discovery::Known,
            Discovery::New { index: 2 },
            Discovery::Known,
        ]);

        let ids: Vec<u32> = scanner.devices().map(|device| device.id).collect();
        assert_eq!(ids, vec![7, 3, 9]);
    }

    #[test]
    fn late_name_is_a_rename() {
        let (mut scanner, _) = scanning();

        assert_eq!(scanner.on_discovered(1, None), Discovery::New { index: 0 });
        assert_eq!(scanner.on_discovered(2, None), Discovery::New { index: 1 });
        assert_eq!(scanner.on_discovered(2, Some("CWatch".to_string())), Discovery::Renamed { index: 1 });
        assert_eq!(scanner.on_discovered(2, Some("Other".to_string())), Discovery::Known);
        assert_eq!(scanner.device(1).unwrap().name.as_deref(), Some("CWatch"));
    }

    #[test]
    fn only_the_exact_target_name_is_selectable() {
        let (mut scanner, _) = scanning();
        scanner.on_discovered(1, Some("CWatch 2".to_string()));
        scanner.on_discovered(2, None);
        scanner.on_discovered(3, Some("CWatch".to_string()));

        assert_eq!(scanner.target_at(0, "CWatch"), None);
        assert_eq!(scanner.target_at(1, "CWatch"), None);
        assert_eq!(scanner.target_at(2, "CWatch").map(|device| device.id), Some(3));
        assert_eq!(scanner.target_at(3, "CWatch"), None);
    }

    #[test]
    fn discoveries_outside_a_session_are_ignored() {
        let mut scanner: Scanner<u32> = Scanner::new(PERIOD);
        assert_eq!(scanner.on_discovered(1, None), Discovery::Ignored);
        assert!(scanner.is_empty());
    }

    #[test]
    fn devices_survive_a_new_session() {
        let (mut scanner, now) = scanning();
        scanner.on_discovered(1, Some("A".to_string()));
        scanner.poll_timeout(now + PERIOD);

        assert!(scanner.start(now + PERIOD));
        assert_eq!(scanner.on_discovered(1, Some("A".to_string())), Discovery::Known);
        assert_eq!(scanner.position(&1), Some(0));
        assert_eq!(scanner.len(), 1);
    }
}
