/*!
 # Alarm scheduling

 Day-of-week masks and the "when does this alarm fire next" computation.
 Bit *n* of a mask means "active on day *n*", counting from Sunday = bit 0.
*/

use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing::{debug, trace};

/// Minutes in one day
pub const MINUTES_PER_DAY: i32 = 1440;

/// Number of alarm slots
pub const ALARM_SLOTS: usize = 2;

/// Represents days of the week for scheduling
#[derive(Debug, Clone, Copy)]
pub struct Days {
    /// Sunday (0x01)
    pub sunday: u8,
    /// Monday (0x02)
    pub monday: u8,
    /// Tuesday (0x04)
    pub tuesday: u8,
    /// Wednesday (0x08)
    pub wednesday: u8,
    /// Thursday (0x10)
    pub thursday: u8,
    /// Friday (0x20)
    pub friday: u8,
    /// Saturday (0x40)
    pub saturday: u8,
    /// All days (0x7F)
    pub all: u8,
    /// Week days (Monday-Friday, 0x3E)
    pub week_days: u8,
    /// Weekend days (Saturday-Sunday, 0x41)
    pub weekend_days: u8,
    /// No days (0x00)
    pub none: u8,
}

/// Predefined day constants for scheduling
pub const WEEK_DAYS: Days = Days {
    sunday: 0x01,
    monday: 0x02,
    tuesday: 0x04,
    wednesday: 0x08,
    thursday: 0x10,
    friday: 0x20,
    saturday: 0x40,
    all: 0x01 + 0x02 + 0x04 + 0x08 + 0x10 + 0x20 + 0x40,
    week_days: 0x02 + 0x04 + 0x08 + 0x10 + 0x20,
    weekend_days: 0x40 + 0x01,
    none: 0x00,
};

/// The part of a profile the scheduler needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Schedule {
    pub hour: u8,
    pub minute: u8,
    /// Day-of-week mask, bit 0 = Sunday
    pub days: u8,
}

impl Schedule {
    pub fn new(hour: u8, minute: u8, days: u8) -> Self {
        Self { hour, minute, days }
    }

    /// An empty mask means the slot never fires
    pub fn is_disabled(&self) -> bool {
        self.days & WEEK_DAYS.all == 0
    }

    /// Minutes until this schedule next fires, see [`next_alarm_offset`]
    pub fn offset_from(&self, now: &NaiveDateTime, match_now: bool) -> Option<i32> {
        next_alarm_offset(now, self.days, self.hour, self.minute, match_now)
    }
}

/// Signed minute offset from `now` to the next matching occurrence.
///
/// Returns `None` when the mask is empty or nothing matches. Today only
/// matches when the target time is later than now, or equal to it with
/// `match_now` set. The scan covers today plus seven days ahead so a mask
/// holding only today's weekday still finds next week's slot.
///
/// Only `Some(0)` means "fire now"; callers must not interpret the sign.
pub fn next_alarm_offset(
    now: &NaiveDateTime,
    days: u8,
    hour: u8,
    minute: u8,
    match_now: bool,
) -> Option<i32> {
    let days = days & WEEK_DAYS.all;
    if days == 0 {
        return None;
    }

    let today = now.weekday().num_days_from_sunday();
    let now_hour = now.hour() as i32;
    let now_minute = now.minute() as i32;
    let target = (hour as i32, minute as i32);

    for day_offset in 0..=7u32 {
        let dow = (today + day_offset) % 7;
        if days & (1 << dow) == 0 {
            continue;
        }
        if day_offset == 0 {
            let later = target > (now_hour, now_minute);
            let now_match = match_now && target == (now_hour, now_minute);
            if !later && !now_match {
                continue;
            }
        }
        let offset = day_offset as i32 * MINUTES_PER_DAY
            + (target.0 - now_hour) * 60
            + (target.1 - now_minute);
        trace!(
            "Schedule {:02}:{:02} mask {:#04x} matches in {} minutes",
            hour,
            minute,
            days,
            offset
        );
        return Some(offset);
    }

    None
}

/// Picks the slot that fires soonest.
///
/// `enabled` carries the per-slot enable flags from the global config. A slot
/// is a candidate only when enabled and its mask is non-empty. Ties go to the
/// lower slot.
pub fn next_alarm_id(
    now: &NaiveDateTime,
    enabled: [bool; ALARM_SLOTS],
    schedules: &[Schedule; ALARM_SLOTS],
) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (slot, schedule) in schedules.iter().enumerate() {
        if !enabled[slot] {
            continue;
        }
        let Some(offset) = schedule.offset_from(now, false) else {
            continue;
        };
        match best {
            Some((_, best_offset)) if best_offset <= offset => {}
            _ => best = Some((slot, offset)),
        }
    }
    debug!("Next alarm: {:?}", best);
    best.map(|(slot, _)| slot)
}

/// Parse days string to bitmask
pub fn parse_days(days: &str) -> u8 {
    match days.trim().to_lowercase().as_str() {
        "sun" | "sunday" => WEEK_DAYS.sunday,
        "mon" | "monday" => WEEK_DAYS.monday,
        "tue" | "tuesday" => WEEK_DAYS.tuesday,
        "wed" | "wednesday" => WEEK_DAYS.wednesday,
        "thu" | "thursday" => WEEK_DAYS.thursday,
        "fri" | "friday" => WEEK_DAYS.friday,
        "sat" | "saturday" => WEEK_DAYS.saturday,
        "all" => WEEK_DAYS.all,
        "weekdays" => WEEK_DAYS.week_days,
        "weekend" => WEEK_DAYS.weekend_days,
        "none" | "" => WEEK_DAYS.none,
        composite if composite.contains(',') => composite
            .split(',')
            .map(parse_days)
            .fold(0, |combined, day| combined | day),
        other => {
            debug!("Ignoring unknown day '{}'", other);
            WEEK_DAYS.none
        }
    }
}

/// Renders a mask as `SMTWTFS` with `-` for inactive days
pub fn format_days(days: u8) -> String {
    "SMTWTFS"
        .chars()
        .enumerate()
        .map(|(i, c)| if days & (1 << i) != 0 { c } else { '-' })
        .collect()
}
