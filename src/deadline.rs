// PROCBENCH DEADLINES
// ABSOLUTE WALL-CLOCK DEADLINE PLUS A SHARED CANCELLATION FLAG.
//
// LEVEL-TRIGGERED: ONCE EXPIRED OR CANCELLED, is_done() STAYS TRUE ON EVERY
// CALL. SAFE TO QUERY FROM ANY NUMBER OF THREADS.
//
// A LINKED DEADLINE OBSERVES ITS PARENT BUT NEVER CANCELS IT.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// CLONES SHARE ONE FLAG. CANCELLING ANY CLONE CANCELS ALL OF THEM.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug)]
pub struct Deadline {
    at: Option<Instant>,
    token: CancelToken,
    parent: Option<CancelToken>,
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self {
            at: Some(at),
            token: CancelToken::new(),
            parent: None,
        }
    }

    // AN UNREPRESENTABLE INSTANT (HUGE DURATION) DEGRADES TO NEVER
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            token: CancelToken::new(),
            parent: None,
        }
    }

    pub fn never() -> Self {
        Self {
            at: None,
            token: CancelToken::new(),
            parent: None,
        }
    }

    // ALSO DONE WHEN parent (E.G. CTRL+C) IS CANCELLED
    pub fn linked_to(mut self, parent: &CancelToken) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    // THIS DEADLINE'S OWN TOKEN, NEVER THE PARENT
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.parent.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    // NONE FOR A DEADLINE THAT NEVER EXPIRES
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}
