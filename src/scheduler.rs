//! Cooperative scheduling of periodic tasks.
//!
//! Tasks run one at a time on the calling thread; a cycle always runs to
//! completion before the next is considered. A cycle that overruns its own
//! cadence has the missed ticks skipped and logged rather than replayed in
//! a burst.

use std::time::{Duration, Instant};

struct Task {
    name: String,
    interval: Duration,
    next_due: Instant,
    job: Box<dyn FnMut()>,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<Task>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a periodic task. The first run happens one full interval
    /// after registration.
    pub fn add_task(&mut self, name: &str, interval: Duration, job: impl FnMut() + 'static) {
        self.tasks.push(Task {
            name: name.to_string(),
            interval,
            next_due: Instant::now() + interval,
            job: Box::new(job),
        });
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Run every task whose deadline has passed, returning how many ran.
    pub fn run_due(&mut self, now: Instant) -> usize {
        let mut ran = 0;
        for task in &mut self.tasks {
            if now < task.next_due {
                continue;
            }

            log::debug!("running task '{}'", task.name);
            (task.job)();
            ran += 1;

            task.next_due += task.interval;
            if task.next_due <= now {
                let mut skipped = 0u32;
                while task.next_due <= now {
                    task.next_due += task.interval;
                    skipped += 1;
                }
                log::warn!(
                    "task '{}' overran its {} ms interval; skipped {skipped} tick(s)",
                    task.name,
                    task.interval.as_millis()
                );
            }
        }
        ran
    }

    /// Earliest pending deadline across all tasks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|task| task.next_due).min()
    }

    /// Drive all registered tasks until the process exits.
    pub fn run_forever(&mut self) {
        if self.tasks.is_empty() {
            log::warn!("no periodic tasks registered; nothing to do");
            return;
        }

        loop {
            self.run_due(Instant::now());
            if let Some(deadline) = self.next_deadline() {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::rc::Rc;

    fn counting_task(scheduler: &mut Scheduler, name: &str, interval_ms: u64) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        scheduler.add_task(name, Duration::from_millis(interval_ms), move || {
            counter.set(counter.get() + 1);
        });
        count
    }

    #[test]
    fn tasks_run_on_their_own_cadence() {
        let mut scheduler = Scheduler::new();
        let start = Instant::now();
        let fast = counting_task(&mut scheduler, "fast", 10);
        let slow = counting_task(&mut scheduler, "slow", 25);

        scheduler.run_due(start + Duration::from_millis(11));
        assert_eq!((fast.get(), slow.get()), (1, 0));

        scheduler.run_due(start + Duration::from_millis(21));
        assert_eq!((fast.get(), slow.get()), (2, 0));

        scheduler.run_due(start + Duration::from_millis(26));
        assert_eq!((fast.get(), slow.get()), (2, 1));

        scheduler.run_due(start + Duration::from_millis(31));
        assert_eq!((fast.get(), slow.get()), (3, 1));
    }

    #[test]
    fn task_does_not_run_before_first_interval() {
        let mut scheduler = Scheduler::new();
        let start = Instant::now();
        let count = counting_task(&mut scheduler, "poll", 50);

        assert_eq!(scheduler.run_due(start + Duration::from_millis(10)), 0);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn missed_ticks_are_skipped_not_replayed() {
        let mut scheduler = Scheduler::new();
        let start = Instant::now();
        let count = counting_task(&mut scheduler, "poll", 10);

        // Far past several deadlines: runs once, skips the backlog
        scheduler.run_due(start + Duration::from_millis(95));
        assert_eq!(count.get(), 1);

        // Next deadline is in the future relative to the missed window
        assert_eq!(scheduler.run_due(start + Duration::from_millis(99)), 0);
        scheduler.run_due(start + Duration::from_millis(111));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn next_deadline_is_the_earliest_pending() {
        let mut scheduler = Scheduler::new();
        assert!(scheduler.next_deadline().is_none());

        counting_task(&mut scheduler, "slow", 500);
        counting_task(&mut scheduler, "fast", 20);

        let deadline = scheduler.next_deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_millis(20));
    }
}
