//! Mainloop timer service (spec.md §4.10): a scheduled-item list keyed by
//! `(fn, key)` plus a one-shot work queue posted from any thread. The loop
//! itself never blocks on I/O; callers drive `tick` from their own
//! single-threaded event loop (spec.md §5).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub name: &'static str,
    pub key: u64,
}

struct ScheduledItem {
    id: TimerId,
    next_fire: Instant,
    period: Option<Duration>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

type WorkItem = Box<dyn FnOnce() + Send>;

/// Single-threaded timer/work-queue service. `set_timer`/`clear_timer` are
/// only ever called from the mainloop thread; `queue_main_work_item` is
/// safe from any thread.
pub struct MainLoop {
    timers: Vec<ScheduledItem>,
    work_queue: Mutex<VecDeque<WorkItem>>,
}

impl MainLoop {
    pub fn new() -> MainLoop {
        MainLoop { timers: Vec::new(), work_queue: Mutex::new(VecDeque::new()) }
    }

    /// Installs or replaces the timer identified by `id`.
    pub fn set_timer(&mut self, id: TimerId, initial_delay: Duration, period: Option<Duration>, now: Instant, callback: Arc<dyn Fn() + Send + Sync>) {
        self.timers.retain(|t| t.id != id);
        self.timers.push(ScheduledItem { id, next_fire: now + initial_delay, period, callback });
    }

    /// Removes a timer. Returns `true` if one was actually removed.
    pub fn clear_timer(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Enqueues a one-shot closure to run on the next `tick`. Safe to call
    /// from any thread.
    pub fn queue_main_work_item(&self, item: WorkItem) {
        self.work_queue.lock().unwrap().push_back(item);
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Fires every due timer (rescheduling periodic ones, dropping one-shot
    /// ones that have fired), then drains the work queue. Returns the
    /// number of timers fired.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut fired = 0;

        for item in self.timers.iter_mut() {
            if item.next_fire <= now {
                (item.callback)();
                fired += 1;
                if let Some(period) = item.period {
                    item.next_fire = now + period;
                }
            }
        }

        self.timers.retain(|t| t.period.is_some() || t.next_fire > now);

        let work: Vec<WorkItem> = {
            let mut queue = self.work_queue.lock().unwrap();
            queue.drain(..).collect()
        };
        for item in work {
            item();
        }

        fired
    }
}

impl Default for MainLoop {
    fn default() -> MainLoop {
        MainLoop::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn one_shot_timer_fires_once() {
        let mut mainloop = MainLoop::new();
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = count.clone();
        let now = Instant::now();

        mainloop.set_timer(
            TimerId { name: "test", key: 1 },
            Duration::from_millis(10),
            None,
            now,
            Arc::new(move || {
                count_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        mainloop.tick(now);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        mainloop.tick(now + Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(mainloop.timer_count(), 0);

        mainloop.tick(now + Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn periodic_timer_reschedules() {
        let mut mainloop = MainLoop::new();
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = count.clone();
        let now = Instant::now();

        mainloop.set_timer(
            TimerId { name: "periodic", key: 1 },
            Duration::from_millis(10),
            Some(Duration::from_millis(10)),
            now,
            Arc::new(move || {
                count_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        mainloop.tick(now + Duration::from_millis(10));
        mainloop.tick(now + Duration::from_millis(20));
        mainloop.tick(now + Duration::from_millis(30));

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(mainloop.timer_count(), 1);
    }

    #[test]
    fn set_timer_with_same_id_replaces_previous() {
        let mut mainloop = MainLoop::new();
        let now = Instant::now();
        mainloop.set_timer(TimerId { name: "t", key: 1 }, Duration::from_secs(1), None, now, Arc::new(|| {}));
        mainloop.set_timer(TimerId { name: "t", key: 1 }, Duration::from_secs(2), None, now, Arc::new(|| {}));
        assert_eq!(mainloop.timer_count(), 1);
    }

    #[test]
    fn clear_timer_removes_pending_item() {
        let mut mainloop = MainLoop::new();
        let now = Instant::now();
        let id = TimerId { name: "t", key: 1 };
        mainloop.set_timer(id, Duration::from_secs(1), None, now, Arc::new(|| {}));

        assert!(mainloop.clear_timer(id));
        assert_eq!(mainloop.timer_count(), 0);
        assert!(!mainloop.clear_timer(id));
    }

    #[test]
    fn work_queue_item_runs_on_next_tick() {
        let mainloop = Mutex::new(MainLoop::new());
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = count.clone();

        mainloop.lock().unwrap().queue_main_work_item(Box::new(move || {
            count_cb.fetch_add(1, Ordering::SeqCst);
        }));

        mainloop.lock().unwrap().tick(Instant::now());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
