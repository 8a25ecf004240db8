//! Per-root publish debouncer
//!
//! Every mutation re-arms the root's timer. A timer that elapses while its
//! generation is still current emits the root once; superseded timers are no-ops.

use crate::types::Root;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    generation: u64,
    armed: bool,
}

#[derive(Clone)]
pub struct Debouncer {
    window: Duration,
    slots: Arc<Mutex<HashMap<Root, Slot>>>,
    fired: mpsc::UnboundedSender<Root>,
}

impl Debouncer {
    /// Create a debouncer and the receiver on which elapsed roots arrive
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<Root>) {
        let (fired, rx) = mpsc::unbounded_channel();
        (
            Self {
                window,
                slots: Arc::new(Mutex::new(HashMap::new())),
                fired,
            },
            rx,
        )
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// A zero window means callers publish inline
    pub fn is_immediate(&self) -> bool {
        self.window.is_zero()
    }

    /// Record a mutation for `root` and (re)start its timer
    pub fn touch(&self, root: &Root) {
        let generation = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(root.clone()).or_default();
            slot.generation += 1;
            slot.armed = true;
            slot.generation
        };
        trace!(root = %root, generation, "Debounce timer armed");

        let slots = Arc::clone(&self.slots);
        let fired = self.fired.clone();
        let window = self.window;
        let root = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let current = {
                let mut slots = slots.lock();
                match slots.get_mut(&root) {
                    Some(slot) if slot.armed && slot.generation == generation => {
                        slot.armed = false;
                        true
                    }
                    _ => false,
                }
            };
            if current {
                trace!(root = %root, generation, "Debounce timer fired");
                let _ = fired.send(root);
            }
        });
    }

    pub fn is_armed(&self, root: &Root) -> bool {
        self.slots.lock().get(root).map_or(false, |s| s.armed)
    }

    /// Disarm every pending timer and return the roots they belonged to
    pub fn take_armed(&self) -> Vec<Root> {
        let mut slots = self.slots.lock();
        let mut roots: Vec<Root> = slots
            .iter_mut()
            .filter(|(_, slot)| slot.armed)
            .map(|(root, slot)| {
                slot.armed = false;
                slot.generation += 1;
                root.clone()
            })
            .collect();
        roots.sort();
        roots
    }
}
