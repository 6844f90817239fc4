//! Repair of future uploads onto the one-per-day grid.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use cadence_models::{Upload, UploadId};

use crate::schedule::{add_days, combine, local_date, GRID_TOLERANCE_SECS};

/// A scheduled instant that must move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub upload_id: UploadId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Plan the moves that put every upload on its own local day at `time`.
///
/// Uploads are placed greedily in chronological order, so their relative
/// order survives. Published or publishing uploads keep their day and are
/// reserved first. An upload that cannot be placed within `horizon_days`
/// of `today` is left untouched.
pub fn plan_normalization(
    uploads: &[Upload],
    today: NaiveDate,
    time: NaiveTime,
    tz: Tz,
    horizon_days: u32,
) -> Vec<Correction> {
    let last_day = add_days(today, u64::from(horizon_days));

    let mut ordered: Vec<&Upload> = uploads
        .iter()
        .filter(|u| u.status.occupies_day())
        .collect();
    ordered.sort_by(|a, b| (a.scheduled_for, &a.id).cmp(&(b.scheduled_for, &b.id)));

    let mut reserved: HashSet<NaiveDate> = ordered
        .iter()
        .filter(|u| u.status.is_pinned())
        .map(|u| local_date(u.scheduled_for, tz))
        .collect();

    let mut corrections = Vec::new();

    for upload in ordered.into_iter().filter(|u| !u.status.is_pinned()) {
        let mut date = local_date(upload.scheduled_for, tz).max(today);
        while reserved.contains(&date) && date <= last_day {
            date = add_days(date, 1);
        }
        if date > last_day {
            continue;
        }
        reserved.insert(date);

        let desired = combine(date, time, tz);
        if (desired - upload.scheduled_for).num_seconds().abs() > GRID_TOLERANCE_SECS {
            corrections.push(Correction {
                upload_id: upload.id.clone(),
                from: upload.scheduled_for,
                to: desired,
            });
        }
    }

    corrections
}
