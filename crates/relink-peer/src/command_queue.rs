use std::collections::VecDeque;

/// Reliable frames waiting for a sequence number.
///
/// When a channel's window is full, framed reliable payloads are parked here in send
/// order and handed seqnums as acknowledgements free them.
#[derive(Debug)]
pub struct CommandQueue {
    /// Unnumbered frames, oldest first
    frames: VecDeque<Vec<u8>>,
    /// Queue length above which callers are warned
    soft_limit: usize,
}

impl CommandQueue {
    /// Creates a queue that reports when it grows past `soft_limit` frames.
    pub fn new(soft_limit: usize) -> Self {
        Self { frames: VecDeque::new(), soft_limit }
    }

    /// Appends a frame. Returns true if the queue is now over its soft limit.
    pub fn enqueue(&mut self, frame: Vec<u8>) -> bool {
        self.frames.push_back(frame);
        self.frames.len() > self.soft_limit
    }

    /// Puts a frame back at the front, keeping send order.
    pub fn requeue_front(&mut self, frame: Vec<u8>) {
        self.frames.push_front(frame);
    }

    /// Takes the oldest frame.
    pub fn dequeue(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Returns the number of queued frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(1024)
    }
}
