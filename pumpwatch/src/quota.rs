//! Per-user daily notification quota with a timezone-fixed reset boundary.
//!
//! The quota epoch runs from UTC midnight to midnight. The scheduler applies
//! [`reset_if_epoch_elapsed`] once per user per cycle before any evaluation,
//! then serialises [`can_send`] / [`record_sent`] per user so concurrently
//! qualifying symbols can never increment past the limit.

use crate::store::UserProfile;
use chrono::{DateTime, NaiveTime, Utc};

/// The 00:00 UTC boundary of the day containing `now`.
pub fn epoch_floor(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Reset the daily counter when `now` crossed into a new quota epoch since
/// the profile's `last_reset`, advancing `last_reset` to the current
/// boundary. Returns whether a reset was applied, so the caller can persist
/// it; invoked once per user per cycle regardless of how many symbols are
/// subsequently evaluated.
pub fn reset_if_epoch_elapsed(profile: &mut UserProfile, now: DateTime<Utc>) -> bool {
    let boundary = epoch_floor(now);
    if profile.last_reset < boundary {
        profile.signals_sent_today = 0;
        profile.last_reset = boundary;
        true
    } else {
        false
    }
}

/// Whether the user can receive another signal today. Admins are exempt from
/// the cap.
pub fn can_send(profile: &UserProfile) -> bool {
    profile.is_admin || profile.signals_sent_today < profile.daily_limit
}

/// Count one delivered signal. Invoked exactly once per signal after the
/// delivery was attempted: on delivery failure the counter still advances,
/// favouring under-sending over over-sending.
pub fn record_sent(profile: &mut UserProfile) {
    profile.signals_sent_today += 1;
}
