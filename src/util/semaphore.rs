//! Counting semaphore whose `wait()` returns the post-decrement value, so a
//! waiter can tell "the count was already at or below zero" apart from
//! "there were other waiters ahead of me" (SPEC_FULL.md section 4.7).

use std::sync::{Condvar, Mutex};

pub struct Semaphore {
    value: Mutex<i64>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: i64) -> Self {
        Self {
            value: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Decrement and block while the result would be negative. Returns the
    /// value immediately after the successful decrement.
    pub fn wait(&self) -> i64 {
        let mut value = self.value.lock().unwrap();
        while *value <= 0 {
            value = self.cond.wait(value).unwrap();
        }
        *value -= 1;
        *value
    }

    /// Increment and wake one waiter. Returns the value after incrementing.
    pub fn signal(&self) -> i64 {
        let mut value = self.value.lock().unwrap();
        *value += 1;
        self.cond.notify_one();
        *value
    }

    pub fn value(&self) -> i64 {
        *self.value.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_then_wait_does_not_block() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.signal(), 1);
        assert_eq!(sem.wait(), 0);
    }

    #[test]
    fn wait_blocks_until_signalled() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = sem.clone();
        let handle = thread::spawn(move || {
            sem2.wait();
        });
        thread::sleep(std::time::Duration::from_millis(20));
        sem.signal();
        handle.join().unwrap();
    }
}
