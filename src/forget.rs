//! Forget coalescing.
//!
//! The inode cache decides when an inode becomes forgettable and appends it to a pending
//! list. A forget operation takes the whole list over in one step (the donor is left empty
//! and immediately reusable), then drains it into as few Forget/BatchForget frames as the
//! frame capacity allows. When the operation finishes, the cache learns which inodes were
//! actually sent; anything drained but not sent, or never drained, is handed back.

use std::collections::VecDeque;
use std::collections::vec_deque;
use std::mem;

use log::debug;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::ll::INodeNo;

/// Inodes drained into one frame. Sized for typical eviction bursts.
pub(crate) type Drained = SmallVec<[INodeNo; 16]>;

/// Ordered list of inodes waiting to be forgotten, oldest first.
///
/// Each entry stands for a lookup count decrement of one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ForgetQueue {
    entries: VecDeque<INodeNo>,
}

impl ForgetQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an inode.
    pub fn push(&mut self, ino: INodeNo) {
        self.entries.push_back(ino);
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending entries, oldest first.
    pub fn iter(&self) -> vec_deque::Iter<'_, INodeNo> {
        self.entries.iter()
    }

    /// Takes over every entry, leaving `self` empty and ready for new entries.
    pub fn take(&mut self) -> ForgetQueue {
        mem::take(self)
    }

    /// Removes and returns the oldest entry.
    pub(crate) fn drain_one(&mut self) -> Option<INodeNo> {
        self.entries.pop_front()
    }

    /// Removes up to `capacity` entries, oldest first.
    pub(crate) fn drain_batch(&mut self, capacity: usize) -> Drained {
        let n = capacity.min(self.entries.len());
        self.entries.drain(..n).collect()
    }

    /// Puts drained entries back in front, keeping their original order.
    pub(crate) fn restore_front(&mut self, drained: &[INodeNo]) {
        for ino in drained.iter().rev() {
            self.entries.push_front(*ino);
        }
    }

    /// Appends every entry of `other`, leaving it empty.
    pub(crate) fn append(&mut self, other: &mut ForgetQueue) {
        self.entries.append(&mut other.entries);
    }
}

impl FromIterator<INodeNo> for ForgetQueue {
    fn from_iter<I: IntoIterator<Item = INodeNo>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ForgetQueue {
    type Item = &'a INodeNo;
    type IntoIter = vec_deque::Iter<'a, INodeNo>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The cache side of forget coalescing.
pub trait ForgetCache: Send + Sync {
    /// The listed inodes were sent to the server and may be dropped for good.
    fn delete_confirmed(&self, inodes: &[INodeNo]);

    /// These inodes were handed to a forget operation but never sent.
    fn restore(&self, unsent: ForgetQueue);
}

/// Shared pending list that cache code appends to and forget operations splice from.
///
/// Pushes and splices are serialized; a splice never observes a half-appended list.
#[derive(Debug, Default)]
pub struct PendingForgets {
    queue: Mutex<ForgetQueue>,
}

impl PendingForgets {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one inode.
    pub fn push(&self, ino: INodeNo) {
        self.queue.lock().push(ino);
    }

    /// Number of queued inodes.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Takes the whole list; the shared list is empty afterwards.
    pub fn splice(&self) -> ForgetQueue {
        self.queue.lock().take()
    }

}

/// A forget operation fed from the pending list reports back to it: sent inodes are gone
/// already, unsent ones go back ahead of anything queued since the splice.
impl ForgetCache for PendingForgets {
    fn delete_confirmed(&self, inodes: &[INodeNo]) {
        debug!("{} inodes forgotten", inodes.len());
    }

    fn restore(&self, mut unsent: ForgetQueue) {
        let mut queue = self.queue.lock();
        unsent.append(&mut queue);
        *queue = unsent;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn queue(ids: &[u64]) -> ForgetQueue {
        ids.iter().map(|&i| INodeNo(i)).collect()
    }

    fn ids(q: &ForgetQueue) -> Vec<u64> {
        q.iter().map(|i| i.0).collect()
    }

    #[test]
    fn take_leaves_donor_empty_and_reusable() {
        let mut donor = queue(&[5, 9, 12]);
        let taken = donor.take();
        assert!(donor.is_empty());
        assert_eq!(donor.iter().count(), 0);
        assert_eq!(ids(&taken), [5, 9, 12]);

        donor.push(INodeNo(20));
        assert_eq!(ids(&donor), [20]);
        assert_eq!(ids(&taken), [5, 9, 12]);
    }

    #[test]
    fn drain_one_in_order() {
        let mut q = queue(&[3, 4]);
        assert_eq!(q.drain_one(), Some(INodeNo(3)));
        assert_eq!(q.drain_one(), Some(INodeNo(4)));
        assert_eq!(q.drain_one(), None);
    }

    #[test]
    fn drain_batch_stops_at_capacity() {
        let mut q = queue(&[5, 9, 12]);
        let drained = q.drain_batch(2);
        assert_eq!(drained.as_slice(), [INodeNo(5), INodeNo(9)]);
        assert_eq!(ids(&q), [12]);

        let drained = q.drain_batch(8);
        assert_eq!(drained.as_slice(), [INodeNo(12)]);
        assert!(q.is_empty());
        assert!(q.drain_batch(8).is_empty());
    }

    #[test]
    fn restore_front_keeps_order() {
        let mut q = queue(&[1, 2, 3, 4]);
        let drained = q.drain_batch(2);
        q.restore_front(&drained);
        assert_eq!(ids(&q), [1, 2, 3, 4]);
    }

    #[test]
    fn pending_splice_and_restore() {
        let pending = PendingForgets::new();
        pending.push(INodeNo(1));
        pending.push(INodeNo(2));
        let taken = pending.splice();
        assert!(pending.is_empty());

        pending.push(INodeNo(3));
        pending.restore(taken);
        assert_eq!(pending.len(), 3);
        assert_eq!(ids(&pending.splice()), [1, 2, 3]);
    }
}
