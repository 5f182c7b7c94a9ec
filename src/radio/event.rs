use crate::wire::{BaseMessage, MAX_FRAME_LEN};

pub const EVENT_QUEUE_CAPACITY: usize = 16;

/// Tagged radio IRQ outcome (spec §3 `RadioEvent`). `Received` carries the
/// raw frame bytes rather than a pre-decoded message: `SyncBeaconHeader` and
/// `PingPongHeader` frames don't fit `BaseMessage`'s generic-payload shape,
/// so only the C8 dispatcher — which inspects the `MessageType` byte first —
/// knows which typed decoder to apply (spec §4.7).
#[derive(Debug, Clone)]
pub enum RadioEvent {
    Received {
        frame: heapless::Vec<u8, MAX_FRAME_LEN>,
        rssi: i16,
        snr: i8,
        timestamp_ms: u32,
    },
    Transmitted {
        message: BaseMessage,
    },
    ReceivedTimeout,
    TransmittedTimeout,
    CrcError,
    PreambleDetected,
    SyncWordValid,
    HeaderValid,
    HeaderError,
    Noise,
    CadDone,
    CadDetected,
    RxError,
    TxError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioEventStats {
    /// Events dropped because the queue was full when a new one arrived.
    pub overflow_count: u32,
    /// Total events ever enqueued (including subsequently-dropped ones).
    pub enqueued_count: u32,
    /// Total events ever dequeued by the worker.
    pub dequeued_count: u32,
}

/// Bounded FIFO between the (untrusted-for-duration) IRQ path and the
/// single worker that drains it (spec §4.2, §9). On overflow the oldest
/// event is dropped and `stats.overflow_count` incremented — the IRQ path
/// itself must never block.
pub struct EventQueue {
    // `heapless::spsc::Queue<T, N>` reserves one slot as an empty/full
    // sentinel and so only ever holds `N - 1` elements; size it one larger
    // than the advertised capacity so `EVENT_QUEUE_CAPACITY` events actually
    // fit (spec §4.2 "bounded FIFO (default capacity 16)").
    queue: heapless::spsc::Queue<RadioEvent, { EVENT_QUEUE_CAPACITY + 1 }>,
    stats: RadioEventStats,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            queue: heapless::spsc::Queue::new(),
            stats: RadioEventStats::default(),
        }
    }

    /// Enqueue an event, producer side (the IRQ handler). Never blocks:
    /// drops the oldest event and counts the overflow if the queue is full.
    pub fn push(&mut self, event: RadioEvent) {
        self.stats.enqueued_count = self.stats.enqueued_count.wrapping_add(1);
        if let Err(event) = self.queue.enqueue(event) {
            // Queue full: drop oldest to make room, then enqueue the new one.
            let _ = self.queue.dequeue();
            self.stats.overflow_count = self.stats.overflow_count.wrapping_add(1);
            let _ = self.queue.enqueue(event);
        }
    }

    pub fn pop(&mut self) -> Option<RadioEvent> {
        let ev = self.queue.dequeue();
        if ev.is_some() {
            self.stats.dequeued_count = self.stats.dequeued_count.wrapping_add(1);
        }
        ev
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> RadioEventStats {
        self.stats
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_ordering_preserved() {
        let mut q = EventQueue::new();
        q.push(RadioEvent::CrcError);
        q.push(RadioEvent::HeaderError);
        q.push(RadioEvent::Noise);
        assert!(matches!(q.pop(), Some(RadioEvent::CrcError)));
        assert!(matches!(q.pop(), Some(RadioEvent::HeaderError)));
        assert!(matches!(q.pop(), Some(RadioEvent::Noise)));
        assert!(q.pop().is_none());
    }

    #[test]
    fn fills_to_capacity_without_overflow() {
        let mut q = EventQueue::new();
        for _ in 0..EVENT_QUEUE_CAPACITY {
            q.push(RadioEvent::Noise);
        }
        assert_eq!(q.stats().overflow_count, 0);
        assert_eq!(q.len(), EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let mut q = EventQueue::new();
        for _ in 0..EVENT_QUEUE_CAPACITY {
            q.push(RadioEvent::Noise);
        }
        q.push(RadioEvent::CadDone); // queue already full: drop one Noise
        assert_eq!(q.stats().overflow_count, 1);
        // Queue should still be at capacity and the newest event present.
        let mut saw_cad_done = false;
        let mut popped = 0;
        while let Some(ev) = q.pop() {
            popped += 1;
            if matches!(ev, RadioEvent::CadDone) {
                saw_cad_done = true;
            }
        }
        assert_eq!(popped, EVENT_QUEUE_CAPACITY);
        assert!(saw_cad_done);
    }
}
