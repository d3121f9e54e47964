//! Double-buffered packet queues shared between the caller and the TX worker
//!
//! The caller appends whole batches to `pending`. The TX worker consumes
//! `transmitting` and may only swap the two buffers once `transmitting` has
//! been fully drained, so packets leave in exactly the order they arrived.

use crate::protocol::TxPacket;
use std::collections::VecDeque;

/// Producer-side and consumer-side packet buffers
#[derive(Debug, Default)]
pub struct PacketQueues {
    pending: Vec<TxPacket>,
    transmitting: VecDeque<TxPacket>,
}

impl PacketQueues {
    /// Create empty queues
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a complete batch from the caller
    pub fn push_batch(&mut self, batch: &mut Vec<TxPacket>) {
        self.pending.append(batch);
    }

    /// Move `pending` into `transmitting` if the consumer side is empty.
    ///
    /// Returns whether a swap happened.
    pub fn swap_if_drained(&mut self) -> bool {
        if !self.transmitting.is_empty() || self.pending.is_empty() {
            return false;
        }
        self.transmitting.extend(self.pending.drain(..));
        true
    }

    /// Take packets from the front of `transmitting` whose encoded size fits
    /// in `budget` bytes. At least one packet is taken when any is queued and
    /// it fits on its own.
    pub fn take_chunk(&mut self, budget: usize) -> Vec<TxPacket> {
        let mut used = 0;
        let mut chunk = Vec::new();
        while let Some(packet) = self.transmitting.front() {
            let len = packet.encoded_len();
            if used + len > budget {
                break;
            }
            used += len;
            chunk.extend(self.transmitting.pop_front());
        }
        chunk
    }

    /// Packets on the consumer side
    pub fn transmitting_len(&self) -> usize {
        self.transmitting.len()
    }

    /// Packets on the producer side
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Packets not yet taken by the consumer
    pub fn len(&self) -> usize {
        self.pending.len() + self.transmitting.len()
    }

    /// Whether both buffers are empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.pending.clear();
        self.transmitting.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Opcode;

    fn batch(n: usize) -> Vec<TxPacket> {
        (0..n).map(|_| TxPacket::new(Opcode::Nop)).collect()
    }

    #[test]
    fn test_swap_only_when_consumer_empty() {
        let mut queues = PacketQueues::new();
        queues.push_batch(&mut batch(3));
        assert!(queues.swap_if_drained());
        assert_eq!(queues.transmitting_len(), 3);

        queues.push_batch(&mut batch(2));
        assert!(!queues.swap_if_drained(), "swap while consumer busy");
        assert_eq!(queues.pending_len(), 2);

        assert_eq!(queues.take_chunk(usize::MAX).len(), 3);
        assert!(queues.swap_if_drained());
        assert_eq!(queues.transmitting_len(), 2);
        assert_eq!(queues.pending_len(), 0);
    }

    #[test]
    fn test_swap_with_nothing_pending_is_noop() {
        let mut queues = PacketQueues::new();
        assert!(!queues.swap_if_drained());
        assert!(queues.is_empty());
    }

    #[test]
    fn test_take_chunk_respects_budget() {
        let mut queues = PacketQueues::new();
        let mut packets = vec![
            TxPacket::with_value(Opcode::Steps, 1000),
            TxPacket::new(Opcode::Stop),
            TxPacket::new(Opcode::Stop),
        ];
        queues.push_batch(&mut packets);
        queues.swap_if_drained();
        assert!(queues.take_chunk(3).is_empty());
        assert_eq!(queues.take_chunk(5).len(), 2);
        assert_eq!(queues.take_chunk(5).len(), 1);
        assert!(queues.is_empty());
    }
}
