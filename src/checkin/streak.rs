//! Consecutive-day streak arithmetic and bonus table.
//!
//! A streak increments by exactly 1 when the user was last active exactly one
//! calendar day before today, holds steady when already active today, and
//! resets to 1 for any other gap. Computed lazily at check-in time; there is
//! no background reset job.

use chrono::NaiveDate;

/// (minimum streak days, bonus percent), largest threshold first.
const BONUS_TIERS: [(u32, u32); 6] = [(30, 50), (14, 35), (7, 25), (5, 15), (3, 10), (2, 5)];

/// Advance a streak for a qualifying check-in on `today`.
pub fn advance_streak(last_active: Option<NaiveDate>, today: NaiveDate, current: u32) -> u32 {
    match last_active {
        Some(date) if date == today => current.max(1),
        Some(date) if today.signed_duration_since(date).num_days() == 1 => current + 1,
        _ => 1,
    }
}

/// Largest bonus tier the streak meets, as a whole percent. 0 if none.
pub fn bonus_percent(streak_days: u32) -> u32 {
    BONUS_TIERS
        .iter()
        .find(|(threshold, _)| streak_days >= *threshold)
        .map(|(_, percent)| *percent)
        .unwrap_or(0)
}

/// Floored bonus for a base reward amount.
pub fn bonus_amount(reward_amount: i64, percent: u32) -> i64 {
    reward_amount * percent as i64 / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_consecutive_day_increments() {
        let today = date(2026, 8, 29);
        assert_eq!(advance_streak(Some(date(2026, 8, 28)), today, 4), 5);
    }

    #[test]
    fn test_same_day_holds() {
        let today = date(2026, 8, 29);
        assert_eq!(advance_streak(Some(today), today, 4), 4);
    }

    #[test]
    fn test_gap_resets() {
        let today = date(2026, 8, 29);
        assert_eq!(advance_streak(Some(date(2026, 8, 26)), today, 9), 1);
        assert_eq!(advance_streak(None, today, 9), 1);
        // Clock skew: last_active in the future also resets
        assert_eq!(advance_streak(Some(date(2026, 8, 30)), today, 9), 1);
    }

    #[test]
    fn test_month_boundary_increments() {
        assert_eq!(
            advance_streak(Some(date(2026, 7, 31)), date(2026, 8, 1), 2),
            3
        );
    }

    #[test]
    fn test_bonus_tiers() {
        assert_eq!(bonus_percent(1), 0);
        assert_eq!(bonus_percent(2), 5);
        assert_eq!(bonus_percent(3), 10);
        assert_eq!(bonus_percent(4), 10);
        assert_eq!(bonus_percent(5), 15);
        assert_eq!(bonus_percent(7), 25);
        assert_eq!(bonus_percent(13), 25);
        assert_eq!(bonus_percent(14), 35);
        assert_eq!(bonus_percent(30), 50);
        assert_eq!(bonus_percent(365), 50);
    }

    #[test]
    fn test_bonus_amount_floors() {
        assert_eq!(bonus_amount(100, 25), 25);
        assert_eq!(bonus_amount(99, 25), 24);
        assert_eq!(bonus_amount(10, 5), 0);
        assert_eq!(bonus_amount(0, 50), 0);
    }
}
