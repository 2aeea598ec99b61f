//! Typed object pools (spec.md §4 "Object pooling / free lists"). Grounded
//! on the free-list pattern `neutronium::net::endpoint::Endpoint` uses for
//! its `Channel` slots (`free: Vec<ChannelId>`), generalized to arbitrary
//! poolable value types such as player sets, string builders and byte
//! buffers.

use std::sync::Mutex;

/// A pool of reusable `T` values. `reset` is run on every value as it is
/// returned so the next `take()` sees a clean instance without re-running
/// `new`.
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    new: Box<dyn Fn() -> T + Send + Sync>,
    reset: Box<dyn Fn(&mut T) + Send + Sync>,
}

impl<T> Pool<T> {
    pub fn new<N, R>(new: N, reset: R) -> Pool<T>
    where
        N: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        Pool {
            free: Mutex::new(Vec::new()),
            new: Box::new(new),
            reset: Box::new(reset),
        }
    }

    /// Takes a value from the pool, constructing a new one if none are free.
    pub fn take(&self) -> T {
        self.free.lock().unwrap().pop().unwrap_or_else(|| (self.new)())
    }

    /// Resets and returns `value` to the pool.
    pub fn give(&self, mut value: T) {
        (self.reset)(&mut value);
        self.free.lock().unwrap().push(value);
    }

    /// Number of values currently parked in the pool.
    pub fn len(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convenience constructor for pools of `Vec<u8>`-like buffers, the most
/// common poolable kind (reliable-send scratch buffers, grouped-packet
/// assembly buffers).
pub fn byte_buffer_pool(capacity: usize) -> Pool<Vec<u8>> {
    Pool::new(move || Vec::with_capacity(capacity), |buf| buf.clear())
}

/// Convenience constructor for pools of reusable `String` builders (chat
/// formatting, select-box text assembly).
pub fn string_pool() -> Pool<String> {
    Pool::new(String::new, |s| s.clear())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_reuses_given_values() {
        let pool: Pool<Vec<u8>> = byte_buffer_pool(16);

        let mut buf = pool.take();
        buf.extend_from_slice(b"hello");
        pool.give(buf);

        assert_eq!(pool.len(), 1);

        let buf2 = pool.take();
        assert!(buf2.is_empty());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn take_constructs_new_value_when_empty() {
        let pool = string_pool();
        let s = pool.take();
        assert!(s.is_empty());
    }
}
