//! Usage-period rollover.

use chrono::{DateTime, TimeDelta, Utc};

/// Window length used when the stored bounds are degenerate.
pub fn default_period() -> TimeDelta {
    TimeDelta::days(30)
}

/// Advance `[start, end)` by whole windows until `end >= now`.
///
/// The window length is `end - start`, or 30 days when that is not positive.
/// Bounds already covering `now` are returned unchanged.
pub fn rollover_window(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    if now <= period_end {
        return (period_start, period_end);
    }

    let mut window = period_end - period_start;
    if window <= TimeDelta::zero() {
        window = default_period();
    }

    let shift = (now - period_end)
        .num_microseconds()
        .zip(window.num_microseconds())
        .and_then(|(behind, step)| {
            let windows = behind / step + i64::from(behind % step != 0);
            windows.checked_mul(step)
        })
        .map(TimeDelta::microseconds);

    if let Some(shift) = shift
        && let (Some(start), Some(end)) = (
            period_start.checked_add_signed(shift),
            period_end.checked_add_signed(shift),
        )
    {
        return (start, end);
    }

    // Spans too large for microsecond arithmetic.
    let (mut start, mut end) = (period_start, period_end);
    while now > end {
        start += window;
        end += window;
    }
    (start, end)
}
