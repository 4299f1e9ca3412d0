// Deletion queue - ordered teardown
//
// Every object created during setup registers a release entry here. Later
// objects may depend on earlier ones (a framebuffer on its render pass, a
// render pass on the device), so releasing in exact reverse registration
// order tears everything down without tracking a dependency graph.

use anyhow::Result;

/// Consumes release entries one at a time.
///
/// The Vulkan dispatcher implements this for [`Resource`](super::Resource);
/// plain closures implement it too, which is handy for tests.
pub trait Release<T> {
    fn release(&mut self, entry: T) -> Result<()>;
}

impl<T, F> Release<T> for F
where
    F: FnMut(T) -> Result<()>,
{
    fn release(&mut self, entry: T) -> Result<()> {
        self(entry)
    }
}

/// LIFO registry of release entries.
///
/// Single-threaded by construction: only the render thread registers and
/// drains.
pub struct DeletionQueue<T> {
    entries: Vec<T>,
}

impl<T> DeletionQueue<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register an entry. Entries are released in the reverse of push order.
    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the order `drain` would release them
    pub fn release_order(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().rev()
    }

    /// Release every entry, newest first, leaving the queue empty.
    ///
    /// The caller must make sure nothing is still using the resources (for
    /// Vulkan: wait for the device to go idle first).
    ///
    /// A failed release stops the drain and is returned as-is. Entries
    /// registered before the failing one stay queued; the failed entry has
    /// already been consumed and is never released twice.
    pub fn drain<R: Release<T>>(&mut self, releaser: &mut R) -> Result<()> {
        while let Some(entry) = self.entries.pop() {
            releaser.release(entry)?;
        }
        Ok(())
    }
}

impl<T> Default for DeletionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for DeletionQueue<T> {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::warn!(
                "Deletion queue dropped with {} entries still registered; they are leaked",
                self.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_drain(queue: &mut DeletionQueue<&'static str>) -> (Vec<&'static str>, Result<()>) {
        let mut released = Vec::new();
        let result = queue.drain(&mut |entry: &'static str| -> Result<()> {
            released.push(entry);
            Ok(())
        });
        (released, result)
    }

    #[test]
    fn test_drain_releases_in_reverse_order() {
        let mut queue = DeletionQueue::new();
        queue.push("x");
        queue.push("y");
        queue.push("z");

        let (released, result) = recording_drain(&mut queue);

        assert!(result.is_ok());
        assert_eq!(released, vec!["z", "y", "x"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reverse_order_holds_for_longer_sequences() {
        for count in 0..32u32 {
            let mut queue = DeletionQueue::new();
            for i in 0..count {
                queue.push(i);
            }

            let mut released = Vec::new();
            queue
                .drain(&mut |entry: u32| -> Result<()> {
                    released.push(entry);
                    Ok(())
                })
                .unwrap();

            let expected: Vec<u32> = (0..count).rev().collect();
            assert_eq!(released, expected);
        }
    }

    #[test]
    fn test_empty_drain_is_a_no_op() {
        let mut queue: DeletionQueue<&'static str> = DeletionQueue::new();

        let (released, result) = recording_drain(&mut queue);
        assert!(result.is_ok());
        assert!(released.is_empty());

        // Draining again after a full drain is also a no-op
        queue.push("only");
        recording_drain(&mut queue).1.unwrap();
        let (released, _) = recording_drain(&mut queue);
        assert!(released.is_empty());
    }

    #[test]
    fn test_release_order_matches_drain() {
        let mut queue = DeletionQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        let preview: Vec<i32> = queue.release_order().copied().collect();
        assert_eq!(preview, vec![3, 2, 1]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_failed_release_stops_drain_and_keeps_older_entries() {
        let mut queue = DeletionQueue::new();
        queue.push("instance");
        queue.push("device");
        queue.push("swapchain");
        queue.push("pipeline");

        let mut released = Vec::new();
        let err = queue
            .drain(&mut |entry: &'static str| -> Result<()> {
                if entry == "swapchain" {
                    anyhow::bail!("cannot release {}", entry);
                }
                released.push(entry);
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.to_string(), "cannot release swapchain");
        assert_eq!(released, vec!["pipeline"]);
        let remaining: Vec<_> = queue.release_order().copied().collect();
        assert_eq!(remaining, vec!["device", "instance"]);
    }

    #[test]
    fn test_each_entry_released_at_most_once() {
        let mut queue = DeletionQueue::new();
        queue.push("a");
        queue.push("b");

        let mut calls = 0;
        for _ in 0..3 {
            queue
                .drain(&mut |_: &'static str| -> Result<()> {
                    calls += 1;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_struct_releaser() {
        struct Log(Vec<u8>);

        impl Release<u8> for Log {
            fn release(&mut self, entry: u8) -> Result<()> {
                self.0.push(entry);
                Ok(())
            }
        }

        let mut queue = DeletionQueue::new();
        queue.push(10);
        queue.push(20);

        let mut log = Log(Vec::new());
        queue.drain(&mut log).unwrap();
        assert_eq!(log.0, vec![20, 10]);
    }
}
