// Fitting raw series samples into fixed-length, evenly spaced chart windows
use crate::application::series_context::SeriesContext;
use crate::domain::point::{Point, RawPoint};

/// Normalizes arbitrary (unsorted, sparse, duplicated, misaligned) samples into
/// exactly `windows_count` points sorted ascending and spaced by
/// `time_resolution`, ending at the context anchor.
///
/// Missing windows are filled with fake points. `newest` is set on the
/// trailing run up to the first real point when the context shows the newest
/// window available. `oldest` is set on every point at or before the oldest
/// sample, but only when the source returned fewer samples than requested
/// (`windows_count + 1`), i.e. when the beginning of the series was reached.
pub fn fit_points_to_context(context: &SeriesContext, raw_points: &[RawPoint]) -> Vec<Point> {
    if !context.is_valid() {
        return Vec::new();
    }
    let resolution = context.time_resolution;
    let windows_count = context.windows_count;
    let mut points = newest_first(context, raw_points);

    let is_newest_window = context.is_newest_window();

    let Some(newest_timestamp) = points.first().map(|p| p.timestamp) else {
        return match context.last_window_timestamp {
            Some(last) => generate_fake_points(context, last, is_newest_window),
            None => Vec::new(),
        };
    };

    let globally_oldest_timestamp = if points.len() < windows_count + 1 {
        points.last().map(|p| p.timestamp)
    } else {
        None
    };

    // Grid origin is the newest sample, not zero.
    points.retain(|p| (newest_timestamp - p.timestamp) % resolution == 0);
    points.truncate(windows_count);

    let mut with_gaps = Vec::with_capacity(windows_count * 2);
    if let Some(last) = context.last_window_timestamp {
        if last - resolution >= newest_timestamp {
            let missing_seconds = last - newest_timestamp;
            let mut next_fake_timestamp =
                newest_timestamp + (missing_seconds - missing_seconds % resolution);
            while next_fake_timestamp > newest_timestamp && with_gaps.len() < windows_count {
                with_gaps.push(Point::fake(next_fake_timestamp));
                next_fake_timestamp -= resolution;
            }
        }
    }
    with_gaps.extend(points);

    let mut fitted = Vec::with_capacity(windows_count);
    let mut next_timestamp = with_gaps[0].timestamp;
    let mut source = with_gaps.into_iter().peekable();
    while fitted.len() < windows_count {
        match source.next_if(|p| p.timestamp == next_timestamp) {
            Some(point) => fitted.push(point),
            None => fitted.push(Point::fake(next_timestamp)),
        }
        next_timestamp -= resolution;
    }

    if is_newest_window {
        for point in fitted.iter_mut() {
            point.newest = true;
            if !point.fake {
                break;
            }
        }
    }

    fitted.reverse();

    if let Some(oldest_timestamp) = globally_oldest_timestamp {
        for point in fitted.iter_mut() {
            if point.timestamp > oldest_timestamp {
                break;
            }
            point.oldest = true;
        }
    }

    fitted
}

/// Value of the newest non-empty sample older than `timestamp`, considering
/// only samples on the same grid `fit_points_to_context` keeps.
pub fn value_before(context: &SeriesContext, raw_points: &[RawPoint], timestamp: i64) -> Option<f64> {
    if !context.is_valid() {
        return None;
    }
    let points = newest_first(context, raw_points);
    let newest_timestamp = points.first()?.timestamp;
    points
        .iter()
        .filter(|p| (newest_timestamp - p.timestamp) % context.time_resolution == 0)
        .find(|p| p.timestamp < timestamp && p.value.is_some())
        .and_then(|p| p.value)
}

/// Samples sorted newest first, deduplicated (first occurrence wins) and cut
/// at the context anchor.
fn newest_first(context: &SeriesContext, raw_points: &[RawPoint]) -> Vec<Point> {
    let mut points: Vec<Point> = raw_points.iter().copied().map(Point::from).collect();
    points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    points.dedup_by_key(|p| p.timestamp);
    if let Some(last) = context.last_window_timestamp {
        points.retain(|p| p.timestamp <= last);
    }
    points
}

/// `windows_count` fake points ending at `anchor` aligned down to the
/// resolution grid. Used whenever there is no real data to show.
pub fn generate_fake_points(context: &SeriesContext, anchor: i64, newest: bool) -> Vec<Point> {
    if !context.is_valid() {
        return Vec::new();
    }
    let resolution = context.time_resolution;
    let last_timestamp = anchor - anchor.rem_euclid(resolution);
    let first_timestamp = last_timestamp - (context.windows_count as i64 - 1) * resolution;

    (0..context.windows_count as i64)
        .map(|idx| {
            Point::fake(first_timestamp + idx * resolution)
                .with_oldest(true)
                .with_newest(newest)
        })
        .collect()
}
