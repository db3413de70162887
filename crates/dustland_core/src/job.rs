//! # Jobs
//!
//! A job is one scheduled unit of work: a kind, the numeric id of the thing
//! it works on, and whether it puts itself back on the queue after running.
//!
//! Jobs never hold a reference to their target. The worker that executes a
//! job resolves the id through the owning registry every time, so a target
//! that was removed since the job was queued is simply not found.

/// What a job does.
///
/// Kinds below [`JobKind::Synchronize`] carry a target and are dispatched to
/// a registered handler. The last three are control kinds the worker loop
/// interprets itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum JobKind {
    /// Decode and dispatch pending messages of one client connection.
    Client = 0,
    /// Advance one critter by a logical tick.
    Critter = 1,
    /// Advance one map by a logical tick.
    Map = 2,
    /// Fire due scheduled time events.
    TimeEvents = 3,
    /// Garbage collection pass over the world.
    Garbage = 4,
    /// Sweep expired bans.
    Bans = 5,
    /// Barrier arrival point: park if a synchronize round is pending.
    Synchronize = 6,
    /// Terminates the worker that pops it.
    Finish = 7,
    /// Does nothing. Used to wake a worker.
    Nop = 8,
}

impl JobKind {
    /// Number of job kinds.
    pub const COUNT: usize = 9;

    /// Every kind, in discriminant order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Client,
        Self::Critter,
        Self::Map,
        Self::TimeEvents,
        Self::Garbage,
        Self::Bans,
        Self::Synchronize,
        Self::Finish,
        Self::Nop,
    ];

    /// Kinds that only exist to run periodic maintenance.
    pub const PERIODIC: [Self; 3] = [Self::TimeEvents, Self::Garbage, Self::Bans];

    /// Returns true for kinds handled by the worker loop rather than a handler.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Synchronize | Self::Finish | Self::Nop)
    }

    /// Index into per-kind tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A unit of work.
///
/// Immutable once created. The queue owns it while enqueued, the worker
/// that popped it owns it while it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Job {
    /// What to do.
    pub kind: JobKind,
    /// Id of the connection or entity this job works on (0 when unused).
    pub target: u64,
    /// Whether the job re-enqueues itself after a successful run.
    pub recurring: bool,
}

impl Job {
    /// A job that runs again after every completion.
    #[inline]
    #[must_use]
    pub const fn recurring(kind: JobKind, target: u64) -> Self {
        Self {
            kind,
            target,
            recurring: true,
        }
    }

    /// A job that runs once.
    #[inline]
    #[must_use]
    pub const fn once(kind: JobKind, target: u64) -> Self {
        Self {
            kind,
            target,
            recurring: false,
        }
    }

    /// A control job with no target.
    #[inline]
    #[must_use]
    pub const fn control(kind: JobKind) -> Self {
        Self {
            kind,
            target: 0,
            recurring: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_kinds() {
        let control: Vec<_> = JobKind::ALL.iter().filter(|k| k.is_control()).collect();
        assert_eq!(control, [&JobKind::Synchronize, &JobKind::Finish, &JobKind::Nop]);
        for kind in JobKind::PERIODIC {
            assert!(!kind.is_control());
        }
    }

    #[test]
    fn test_kind_index_matches_table() {
        for (i, kind) in JobKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_constructors() {
        assert!(Job::recurring(JobKind::Map, 7).recurring);
        assert!(!Job::once(JobKind::Map, 7).recurring);
        let finish = Job::control(JobKind::Finish);
        assert_eq!(finish.target, 0);
        assert!(!finish.recurring);
    }
}
