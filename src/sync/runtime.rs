use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use wasm_bindgen::JsCast;

pub type Task = Box<dyn FnOnce()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

/// Cancellable delayed tasks.
pub trait Scheduler {
    fn schedule(&self, delay_ms: u32, task: Task) -> TimerHandle;

    /// Cancelling an already-fired or unknown handle is a no-op.
    fn cancel(&self, handle: TimerHandle);
}

/// Runs a future on the current thread's executor.
pub trait Spawner {
    fn spawn(&self, fut: LocalBoxFuture<'static, ()>);
}

#[derive(Default)]
struct VirtualInner {
    now_ms: u64,
    next_id: u64,
    /// (due_ms, id) -> task; ids break ties in scheduling order.
    queue: BTreeMap<(u64, u64), Task>,
}

/// Virtual clock for driving timers deterministically in tests.
#[derive(Clone, Default)]
pub struct VirtualTimers {
    inner: Rc<RefCell<VirtualInner>>,
}

impl VirtualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.borrow().now_ms
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Moves the clock forward, firing every task due on the way in due order.
    /// Tasks scheduled by fired tasks run too if they fall inside the window.
    pub fn advance(&self, ms: u64) {
        let target = self.inner.borrow().now_ms + ms;
        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                let due = inner.queue.keys().next().copied().filter(|(at, _)| *at <= target);
                match due {
                    Some(k) => {
                        inner.now_ms = k.0;
                        inner.queue.remove(&k)
                    }
                    None => None,
                }
            };
            match next {
                Some(task) => task(),
                None => break,
            }
        }
        self.inner.borrow_mut().now_ms = target;
    }
}

impl Scheduler for VirtualTimers {
    fn schedule(&self, delay_ms: u32, task: Task) -> TimerHandle {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        let due = inner.now_ms + u64::from(delay_ms);
        inner.queue.insert((due, id), task);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.inner.borrow_mut().queue.retain(|(_, id), _| *id != handle.0);
    }
}

/// `window.setTimeout` backed scheduler.
#[derive(Clone, Copy, Default)]
pub struct BrowserTimers;

impl Scheduler for BrowserTimers {
    fn schedule(&self, delay_ms: u32, task: Task) -> TimerHandle {
        let Some(win) = web_sys::window() else {
            tracing::warn!("no window; dropping scheduled task");
            return TimerHandle(0);
        };

        let cb = wasm_bindgen::closure::Closure::once_into_js(move || task());
        let tid = win
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                cb.as_ref().unchecked_ref(),
                i32::try_from(delay_ms).unwrap_or(i32::MAX),
            )
            .unwrap_or(0);

        TimerHandle(tid as u64)
    }

    fn cancel(&self, handle: TimerHandle) {
        if handle.0 == 0 {
            return;
        }
        if let Some(win) = web_sys::window() {
            win.clear_timeout_with_handle(handle.0 as i32);
        }
    }
}

/// Spawns onto the Leptos local executor.
#[derive(Clone, Copy, Default)]
pub struct LeptosSpawner;

impl Spawner for LeptosSpawner {
    fn spawn(&self, fut: LocalBoxFuture<'static, ()>) {
        leptos::task::spawn_local(fut);
    }
}

impl Spawner for futures::executor::LocalSpawner {
    fn spawn(&self, fut: LocalBoxFuture<'static, ()>) {
        if let Err(e) = self.spawn_local(fut) {
            tracing::warn!(error = %e, "local executor is shut down; task dropped");
        }
    }
}

/// Coalesces bursts of calls into one task after a quiet period.
///
/// Each `trigger` cancels the previously scheduled task, so only the last task of a burst
/// ever runs.
pub struct Debouncer {
    scheduler: Rc<dyn Scheduler>,
    delay_ms: u32,
    timer: Rc<Cell<Option<TimerHandle>>>,
}

impl Debouncer {
    pub fn new(scheduler: Rc<dyn Scheduler>, delay_ms: u32) -> Self {
        Self {
            scheduler,
            delay_ms,
            timer: Rc::new(Cell::new(None)),
        }
    }

    pub fn trigger(&self, task: Task) {
        self.trigger_after(self.delay_ms, task);
    }

    /// Like `trigger` with a one-off delay (used for retry backoff).
    pub fn trigger_after(&self, delay_ms: u32, task: Task) {
        self.cancel();

        let slot = self.timer.clone();
        let handle = self.scheduler.schedule(
            delay_ms,
            Box::new(move || {
                slot.set(None);
                task();
            }),
        );
        self.timer.set(Some(handle));
    }

    pub fn cancel(&self) {
        if let Some(h) = self.timer.take() {
            self.scheduler.cancel(h);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.timer.get().is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_timers_fire_in_due_order() {
        let timers = VirtualTimers::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = log.clone();
        timers.schedule(20, Box::new(move || l1.borrow_mut().push("late")));
        let l2 = log.clone();
        timers.schedule(10, Box::new(move || l2.borrow_mut().push("early")));

        timers.advance(15);
        assert_eq!(*log.borrow(), vec!["early"]);

        timers.advance(5);
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(timers.now_ms(), 20);
    }

    #[test]
    fn test_cancelled_task_never_runs() {
        let timers = VirtualTimers::new();
        let fired = Rc::new(Cell::new(false));

        let f = fired.clone();
        let h = timers.schedule(10, Box::new(move || f.set(true)));
        timers.cancel(h);
        timers.advance(100);

        assert!(!fired.get());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn test_task_scheduled_from_task_fires_within_window() {
        let timers = VirtualTimers::new();
        let count = Rc::new(Cell::new(0));

        let t2 = timers.clone();
        let c = count.clone();
        timers.schedule(
            5,
            Box::new(move || {
                c.set(c.get() + 1);
                let c2 = c.clone();
                t2.schedule(5, Box::new(move || c2.set(c2.get() + 1)));
            }),
        );

        timers.advance(10);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_burst_runs_only_last_task() {
        let timers = VirtualTimers::new();
        let d = Debouncer::new(Rc::new(timers.clone()), 1000);
        let ran = Rc::new(RefCell::new(Vec::new()));

        for v in ["h", "he", "hel", "hello"] {
            let r = ran.clone();
            d.trigger(Box::new(move || r.borrow_mut().push(v)));
            timers.advance(300);
        }
        assert!(ran.borrow().is_empty());
        assert!(d.is_pending());

        timers.advance(1000);
        assert_eq!(*ran.borrow(), vec!["hello"]);
        assert!(!d.is_pending());
    }

    #[test]
    fn test_drop_cancels_pending_task() {
        let timers = VirtualTimers::new();
        let ran = Rc::new(Cell::new(false));
        {
            let d = Debouncer::new(Rc::new(timers.clone()), 50);
            let r = ran.clone();
            d.trigger(Box::new(move || r.set(true)));
        }
        timers.advance(100);
        assert!(!ran.get());
    }
}
