//! # Events — Double-Buffered Channels With Per-System Cursors
//!
//! Each event type `E` gets one channel with two buffers:
//!
//! ```text
//!            committed          pending
//!         ┌─────────────┐   ┌─────────────┐
//! tick N  │ e1 e2       │   │ e3 e4       │ ← dispatch appends here
//!         └─────────────┘   └─────────────┘
//!                 rotate: committed ← pending, pending ← []
//!         ┌─────────────┐   ┌─────────────┐
//! tick N+1│ e3 e4       │   │             │   (e1 e2 dropped, shift = 2)
//!         └─────────────┘   └─────────────┘
//! ```
//!
//! Readers see the logical sequence `committed ‖ pending`. Every system keeps
//! its own offset into that sequence per channel; `poll` returns everything
//! past the offset and moves it to the end. After each rotation the runtime
//! subtracts the shift (size of the dropped buffer) from every offset, so
//! each system sees each event exactly once, from the tick it was dispatched
//! through the end of the next tick.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::{EcsError, Result};

/// Anything that can travel through a channel.
pub trait Event: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Event for T {}

/// One typed channel.
struct Channel<E> {
    committed: Vec<E>,
    pending: Vec<E>,
}

/// Type-erased channel operations the bus needs for rotation and stats.
trait AnyChannel: Send + Sync {
    /// Promote pending to committed. Returns the number of dropped events.
    fn rotate(&mut self) -> usize;
    fn committed_len(&self) -> usize;
    fn pending_len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Event> AnyChannel for Channel<E> {
    fn rotate(&mut self) -> usize {
        let dropped = self.committed.len();
        self.committed = std::mem::take(&mut self.pending);
        dropped
    }

    fn committed_len(&self) -> usize {
        self.committed.len()
    }

    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct ChannelSlot {
    name: &'static str,
    channel: Box<dyn AnyChannel>,
}

/// Per-channel shift amounts produced by [`EventBus::rotate_all`].
pub type Shifts = HashMap<TypeId, usize>;

/// Snapshot of one channel's buffer sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub name: &'static str,
    pub committed: usize,
    pub pending: usize,
}

/// All declared channels.
#[derive(Default)]
pub struct EventBus {
    /// Channels in declaration order.
    slots: Vec<ChannelSlot>,
    index: HashMap<TypeId, usize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the channel for `E`. Declaring twice is a no-op.
    pub fn declare<E: Event>(&mut self) {
        let tid = TypeId::of::<E>();
        if self.index.contains_key(&tid) {
            return;
        }
        self.index.insert(tid, self.slots.len());
        self.slots.push(ChannelSlot {
            name: std::any::type_name::<E>(),
            channel: Box::new(Channel::<E> {
                committed: Vec::new(),
                pending: Vec::new(),
            }),
        });
    }

    pub fn is_declared<E: Event>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<E>())
    }

    fn channel<E: Event>(&self) -> Result<&Channel<E>> {
        self.index
            .get(&TypeId::of::<E>())
            .and_then(|&i| self.slots[i].channel.as_any().downcast_ref::<Channel<E>>())
            .ok_or(EcsError::UnknownEventChannel(std::any::type_name::<E>()))
    }

    fn channel_mut<E: Event>(&mut self) -> Result<&mut Channel<E>> {
        match self.index.get(&TypeId::of::<E>()) {
            Some(&i) => self.slots[i]
                .channel
                .as_any_mut()
                .downcast_mut::<Channel<E>>()
                .ok_or(EcsError::UnknownEventChannel(std::any::type_name::<E>())),
            None => Err(EcsError::UnknownEventChannel(std::any::type_name::<E>())),
        }
    }

    /// Append `event` to the pending buffer.
    pub fn dispatch<E: Event>(&mut self, event: E) -> Result<()> {
        self.channel_mut::<E>()?.pending.push(event);
        Ok(())
    }

    /// Length of the logical `committed ‖ pending` sequence.
    pub fn total_len<E: Event>(&self) -> Result<usize> {
        let channel = self.channel::<E>()?;
        Ok(channel.committed.len() + channel.pending.len())
    }

    pub fn committed_len<E: Event>(&self) -> Result<usize> {
        Ok(self.channel::<E>()?.committed.len())
    }

    pub fn pending_len<E: Event>(&self) -> Result<usize> {
        Ok(self.channel::<E>()?.pending.len())
    }

    /// Events at logical positions `from..`, oldest first.
    pub fn read_from<E: Event>(&self, from: usize) -> Result<impl Iterator<Item = &E>> {
        let channel = self.channel::<E>()?;
        let committed = channel.committed.len();
        let in_committed = channel.committed.get(from.min(committed)..).unwrap_or(&[]);
        let in_pending = channel
            .pending
            .get(from.saturating_sub(committed).min(channel.pending.len())..)
            .unwrap_or(&[]);
        Ok(in_committed.iter().chain(in_pending.iter()))
    }

    /// Rotate every channel. Returns each channel's shift amount.
    pub fn rotate_all(&mut self) -> Shifts {
        let mut shifts = HashMap::with_capacity(self.slots.len());
        for (&tid, &i) in &self.index {
            shifts.insert(tid, self.slots[i].channel.rotate());
        }
        shifts
    }

    pub fn stats(&self) -> Vec<ChannelStats> {
        self.slots
            .iter()
            .map(|slot| ChannelStats {
                name: slot.name,
                committed: slot.channel.committed_len(),
                pending: slot.channel.pending_len(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Per-channel read positions owned by one system.
#[derive(Debug, Default, Clone)]
pub struct EventCursors {
    offsets: HashMap<TypeId, usize>,
}

impl EventCursors {
    pub fn offset<E: Event>(&self) -> usize {
        self.offsets.get(&TypeId::of::<E>()).copied().unwrap_or(0)
    }

    /// Read everything unread on `E` and move the cursor to the end.
    pub fn poll<'b, E: Event>(
        &mut self,
        bus: &'b EventBus,
    ) -> Result<impl Iterator<Item = &'b E> + use<'b, E>> {
        let total = bus.total_len::<E>()?;
        let offset = self.offsets.entry(TypeId::of::<E>()).or_insert(0);
        let from = *offset;
        *offset = total;
        bus.read_from::<E>(from)
    }

    /// Whether nothing on `E` is unread.
    pub fn has_none<E: Event>(&self, bus: &EventBus) -> Result<bool> {
        Ok(self.offset::<E>() >= bus.total_len::<E>()?)
    }

    /// Shift every offset back after a rotation, clamping at zero.
    pub fn rebase(&mut self, shifts: &Shifts) {
        for (tid, offset) in &mut self.offsets {
            if let Some(&shift) = shifts.get(tid) {
                *offset = offset.saturating_sub(shift);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    struct Undeclared;

    fn bus() -> EventBus {
        let mut bus = EventBus::new();
        bus.declare::<Ping>();
        bus
    }

    fn drain(cursors: &mut EventCursors, bus: &EventBus) -> Vec<u32> {
        cursors.poll::<Ping>(bus).unwrap().map(|p| p.0).collect()
    }

    #[test]
    fn undeclared_channel_fails() {
        let mut bus = bus();
        assert!(bus.is_declared::<Ping>());
        assert!(!bus.is_declared::<Undeclared>());
        assert_eq!(
            bus.dispatch(Undeclared).unwrap_err(),
            EcsError::UnknownEventChannel(std::any::type_name::<Undeclared>())
        );
        let mut cursors = EventCursors::default();
        assert!(cursors.poll::<Undeclared>(&bus).is_err());
        assert!(cursors.has_none::<Undeclared>(&bus).is_err());
    }

    #[test]
    fn rotate_reports_dropped_count() {
        let mut bus = bus();
        bus.dispatch(Ping(1)).unwrap();
        bus.dispatch(Ping(2)).unwrap();
        assert_eq!(bus.rotate_all()[&TypeId::of::<Ping>()], 0);
        assert_eq!(bus.committed_len::<Ping>().unwrap(), 2);
        assert_eq!(bus.pending_len::<Ping>().unwrap(), 0);
        assert_eq!(bus.rotate_all()[&TypeId::of::<Ping>()], 2);
        assert_eq!(bus.committed_len::<Ping>().unwrap(), 0);
    }

    #[test]
    fn same_tick_poll_after_dispatch() {
        let mut bus = bus();
        let mut reader = EventCursors::default();
        assert!(reader.has_none::<Ping>(&bus).unwrap());

        bus.dispatch(Ping(1)).unwrap();
        assert!(!reader.has_none::<Ping>(&bus).unwrap());
        assert_eq!(drain(&mut reader, &bus), vec![1]);
        assert!(reader.has_none::<Ping>(&bus).unwrap());

        // Next tick: already seen, nothing new.
        let shifts = bus.rotate_all();
        reader.rebase(&shifts);
        assert!(drain(&mut reader, &bus).is_empty());
    }

    #[test]
    fn each_reader_sees_each_event_once_for_two_ticks() {
        let mut bus = bus();
        let mut early = EventCursors::default();
        let mut late = EventCursors::default();

        // Tick N: dispatch, only `early` polls.
        bus.dispatch(Ping(1)).unwrap();
        bus.dispatch(Ping(2)).unwrap();
        assert_eq!(drain(&mut early, &bus), vec![1, 2]);

        // Tick N+1.
        let shifts = bus.rotate_all();
        early.rebase(&shifts);
        late.rebase(&shifts);
        bus.dispatch(Ping(3)).unwrap();
        assert_eq!(drain(&mut early, &bus), vec![3]);
        assert_eq!(drain(&mut late, &bus), vec![1, 2, 3]);

        // Tick N+2: 1 and 2 are gone for good, 3 was seen by both.
        let shifts = bus.rotate_all();
        early.rebase(&shifts);
        late.rebase(&shifts);
        assert!(drain(&mut early, &bus).is_empty());
        assert!(drain(&mut late, &bus).is_empty());
    }

    #[test]
    fn reader_that_never_polls_loses_old_events() {
        let mut bus = bus();
        let mut idle = EventCursors::default();
        bus.dispatch(Ping(1)).unwrap();
        for _ in 0..2 {
            let shifts = bus.rotate_all();
            idle.rebase(&shifts);
        }
        bus.dispatch(Ping(9)).unwrap();
        assert_eq!(drain(&mut idle, &bus), vec![9]);
    }

    #[test]
    fn stats_in_declaration_order() {
        let mut bus = bus();
        bus.declare::<u64>();
        bus.dispatch(7u64).unwrap();
        let stats = bus.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].pending, 1);
        assert_eq!(stats[0].committed, 0);
    }
}
