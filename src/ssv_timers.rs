// Recurring task handles driven by the UI loop
use log::{debug, warn};
use std::time::{Duration, Instant};

/// A fixed-period timer polled from the owning loop. Nothing runs on its
/// own; `poll` reports whether the period has elapsed.
#[derive(Debug)]
pub struct RecurringTask {
    name: &'static str,
    period: Duration,
    /// `None` once the schedule runs past what `Instant` can represent.
    next_due: Option<Instant>,
    cancelled: bool,
}

impl RecurringTask {
    /// First firing is one full period after `now`.
    pub fn start(name: &'static str, period: Duration, now: Instant) -> Self {
        debug!("starting {} every {:?}", name, period);
        let next_due = now.checked_add(period);
        if next_due.is_none() {
            warn!("{} period {:?} is out of range, it will never fire", name, period);
        }
        RecurringTask {
            name,
            period,
            next_due,
            cancelled: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn next_due(&self) -> Option<Instant> {
        if self.cancelled { None } else { self.next_due }
    }

    /// True at most once per call. Periods missed while the loop was busy
    /// collapse into a single firing.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(mut due) = self.next_due else {
            return false;
        };
        if self.is_cancelled() || now < due {
            return false;
        }
        while due <= now {
            match due.checked_add(self.period) {
                Some(next) => due = next,
                None => {
                    self.next_due = None;
                    return true;
                }
            }
        }
        self.next_due = Some(due);
        true
    }

    pub fn cancel(&mut self) {
        if !self.cancelled {
            debug!("cancelling {}", self.name());
            self.cancelled = true;
        }
    }
}

/// Earliest pending deadline among a set of optional tasks.
pub fn next_deadline<'a>(tasks: impl IntoIterator<Item = &'a Option<RecurringTask>>) -> Option<Instant> {
    tasks
        .into_iter()
        .filter_map(|t| t.as_ref().and_then(|t| t.next_due()))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_per_period() {
        let t0 = Instant::now();
        let mut task = RecurringTask::start("tick", Duration::from_secs(5), t0);
        assert!(!task.poll(t0));
        assert!(!task.poll(t0 + Duration::from_millis(4999)));
        assert!(task.poll(t0 + Duration::from_secs(5)));
        assert!(!task.poll(t0 + Duration::from_secs(6)));
        assert!(task.poll(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_missed_periods_collapse() {
        let t0 = Instant::now();
        let mut task = RecurringTask::start("poll", Duration::from_secs(30), t0);
        assert!(task.poll(t0 + Duration::from_secs(95)));
        assert!(!task.poll(t0 + Duration::from_secs(96)));
        assert_eq!(task.next_due(), Some(t0 + Duration::from_secs(120)));
    }

    #[test]
    fn test_cancelled_task_never_fires() {
        let t0 = Instant::now();
        let mut task = RecurringTask::start("tick", Duration::from_secs(5), t0);
        task.cancel();
        assert!(task.is_cancelled());
        assert!(!task.poll(t0 + Duration::from_secs(60)));
        assert_eq!(task.next_due(), None);
    }

    #[test]
    fn test_unrepresentable_period_never_fires() {
        let t0 = Instant::now();
        let mut task = RecurringTask::start("poll", Duration::from_secs(u64::MAX), t0);
        assert_eq!(task.next_due(), None);
        assert!(!task.poll(t0 + Duration::from_secs(3600)));
        assert_eq!(next_deadline(&[Some(task)]), None);
    }

    #[test]
    fn test_next_deadline() {
        let t0 = Instant::now();
        let tasks = [
            Some(RecurringTask::start("a", Duration::from_secs(30), t0)),
            None,
            Some(RecurringTask::start("b", Duration::from_secs(5), t0)),
        ];
        assert_eq!(next_deadline(&tasks), Some(t0 + Duration::from_secs(5)));
        assert_eq!(next_deadline(&[None]), None);
    }
}
