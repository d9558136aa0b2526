use crate::protocol::Decoded;
use std::sync::{Arc, PoisonError, RwLock};

/// The most recently decoded battery state, shared between the decode loop and its readers.
///
/// A new value is fully built before [`Snapshot::publish`] swaps it in, so readers either see
/// the previous frame or the new one, never a mix.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    current: Arc<RwLock<Option<Arc<Decoded>>>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, decoded: Decoded) {
        let decoded = Arc::new(decoded);
        // The Arc is only ever swapped whole, so a poisoned lock still holds a complete value
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(decoded);
    }

    pub fn latest(&self) -> Option<Arc<Decoded>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::test_frames::sample_state;
    use crate::protocol::{BmsState, Integrity};

    fn decoded(voltage: f32) -> Decoded {
        Decoded {
            state: BmsState {
                voltage,
                ..sample_state()
            },
            integrity: Integrity::Verified,
        }
    }

    #[test]
    fn empty_until_first_publish() {
        assert!(Snapshot::new().latest().is_none());
    }

    #[test]
    fn publish_replaces_previous_value() {
        let snapshot = Snapshot::new();
        snapshot.publish(decoded(50.0));
        let first = snapshot.latest().unwrap();
        snapshot.publish(decoded(51.0));

        // Readers holding the old value keep it
        assert_eq!(first.state.voltage, 50.0);
        assert_eq!(snapshot.latest().unwrap().state.voltage, 51.0);
    }

    #[test]
    fn clones_share_the_value() {
        let snapshot = Snapshot::new();
        let reader = snapshot.clone();
        std::thread::spawn(move || snapshot.publish(decoded(52.5)))
            .join()
            .unwrap();
        assert_eq!(reader.latest().unwrap().state.voltage, 52.5);
    }
}
