//! Onoff switch: a one-shot latch a waiter can block on until another thread
//! turns it on. Used by request completion to wake `wait`/`wait_any`/`wait_all`
//! callers (SPEC_FULL.md section 4.2, 4.7).

use std::sync::{Condvar, Mutex};

pub struct OnOffSwitch {
    state: Mutex<bool>,
    cond: Condvar,
}

impl OnOffSwitch {
    pub fn new(initial: bool) -> Self {
        Self {
            state: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn on(&self) {
        let mut state = self.state.lock().unwrap();
        *state = true;
        self.cond.notify_all();
    }

    pub fn off(&self) {
        *self.state.lock().unwrap() = false;
    }

    pub fn is_on(&self) -> bool {
        *self.state.lock().unwrap()
    }

    pub fn wait_for_on(&self) {
        let mut state = self.state.lock().unwrap();
        while !*state {
            state = self.cond.wait(state).unwrap();
        }
    }
}

impl Default for OnOffSwitch {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_for_on_returns_immediately_if_already_on() {
        let sw = OnOffSwitch::new(true);
        sw.wait_for_on();
    }

    #[test]
    fn wait_for_on_blocks_until_turned_on() {
        let sw = Arc::new(OnOffSwitch::new(false));
        let sw2 = sw.clone();
        let handle = thread::spawn(move || sw2.wait_for_on());
        thread::sleep(std::time::Duration::from_millis(20));
        sw.on();
        handle.join().unwrap();
    }
}
