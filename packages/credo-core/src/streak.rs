//! Daily-activity continuity with a one-day freeze and milestone bonuses.
//!
//! All calendar arithmetic is over dates normalized to UTC midnight; the
//! clock is injected so every scenario is deterministic under test.

use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Exact-match streak milestones and their one-time bonus XP.
pub const STREAK_MILESTONES: &[(u32, u64)] = &[
    (3, 50),
    (7, 100),
    (14, 250),
    (30, 500),
    (60, 1_000),
    (100, 2_000),
    (365, 5_000),
];

pub const DAILY_BONUS_XP: u64 = 10;
pub const FIRST_ACTIVITY_BONUS_XP: u64 = 25;

/// Explicit space bound on per-user history; oldest entries drop first.
pub const HISTORY_CAP: usize = 365;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct DailyEntry {
    pub date: NaiveDate,
    pub xp: u64,
    pub lessons: u32,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct StreakRecord {
    pub user: Pubkey,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: NaiveDate,
    pub freeze_available: bool,
    pub freeze_used_date: Option<NaiveDate>,
    pub history: VecDeque<DailyEntry>,
}

impl StreakRecord {
    fn push_day(&mut self, date: NaiveDate, xp: u64) {
        self.history.push_back(DailyEntry {
            date,
            xp,
            lessons: 1,
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StreakOutcome {
    FirstActivity,
    /// Second or later activity on the same calendar day: counters merge,
    /// the streak does not move, no duplicate bonus.
    SameDay,
    Extended,
    /// The single missed day was covered by the freeze.
    FrozeMissedDay,
    Reset,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StreakUpdate {
    pub record: StreakRecord,
    pub outcome: StreakOutcome,
    pub bonus_xp: u64,
}

fn milestone_bonus(streak: u32) -> u64 {
    STREAK_MILESTONES
        .iter()
        .find(|(days, _)| *days == streak)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0)
}

/// Evaluates one activity-recording call against the previous record.
/// Pure: the caller owns persistence and per-user serialization.
pub fn record_activity(
    prev: Option<StreakRecord>,
    user: Pubkey,
    today: NaiveDate,
    xp: u64,
) -> StreakUpdate {
    let Some(mut record) = prev else {
        let mut record = StreakRecord {
            user,
            current_streak: 1,
            longest_streak: 1,
            last_activity_date: today,
            freeze_available: true,
            freeze_used_date: None,
            history: VecDeque::new(),
        };
        record.push_day(today, xp);
        return StreakUpdate {
            record,
            outcome: StreakOutcome::FirstActivity,
            bonus_xp: FIRST_ACTIVITY_BONUS_XP,
        };
    };

    let gap_days = (today - record.last_activity_date).num_days();

    if gap_days <= 0 {
        // Same calendar day (or a clock running behind the stored date):
        // merge counters only.
        if let Some(entry) = record
            .history
            .iter_mut()
            .find(|entry| entry.date == record.last_activity_date)
        {
            entry.xp += xp;
            entry.lessons += 1;
        }
        return StreakUpdate {
            record,
            outcome: StreakOutcome::SameDay,
            bonus_xp: 0,
        };
    }

    let (outcome, bonus) = match gap_days {
        1 => {
            record.current_streak += 1;
            (
                StreakOutcome::Extended,
                DAILY_BONUS_XP + milestone_bonus(record.current_streak),
            )
        }
        2 if record.freeze_available => {
            // The freeze covers exactly one missed day and is not
            // replenished until the next streak-break-and-restart.
            record.freeze_available = false;
            record.freeze_used_date = Some(today.pred_opt().unwrap_or(today));
            record.current_streak += 1;
            (
                StreakOutcome::FrozeMissedDay,
                DAILY_BONUS_XP + milestone_bonus(record.current_streak),
            )
        }
        _ => {
            record.current_streak = 1;
            record.freeze_available = true;
            record.freeze_used_date = None;
            (StreakOutcome::Reset, DAILY_BONUS_XP)
        }
    };

    record.longest_streak = record.longest_streak.max(record.current_streak);
    record.last_activity_date = today;
    record.push_day(today, xp);

    StreakUpdate {
        record,
        outcome,
        bonus_xp: bonus,
    }
}
