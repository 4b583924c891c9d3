// Aligning several point series to one shared time grid
use crate::domain::point::Point;

/// Shifts every series so that all of them end at the globally newest
/// timestamp. Each series keeps its length; points falling off the old end
/// are dropped and fake points are appended on the new end, inheriting the
/// `newest` flag of the series' last point. Empty series are filled with fake
/// `oldest` + `newest` points (as long as the longest series).
///
/// Every series must be sorted ascending and spaced by `time_resolution`.
pub fn reconcile_points_timing(series: &mut [Vec<Point>], time_resolution: i64) {
    if time_resolution <= 0 {
        return;
    }
    let Some(newest_timestamp) = series
        .iter()
        .filter_map(|points| points.last().map(|p| p.timestamp))
        .max()
    else {
        return;
    };
    let target_len = series.iter().map(Vec::len).max().unwrap_or(0);

    for points in series.iter_mut() {
        let Some(last) = points.last().copied() else {
            *points = trailing_fakes(newest_timestamp, target_len, time_resolution, true)
                .into_iter()
                .map(|p| p.with_oldest(true))
                .collect();
            continue;
        };

        let shift = ((newest_timestamp - last.timestamp) / time_resolution) as usize;
        if shift == 0 {
            continue;
        }
        let len = points.len();
        points.drain(..shift.min(len));
        let missing = len - points.len();
        points.extend(trailing_fakes(
            newest_timestamp,
            missing,
            time_resolution,
            last.newest,
        ));
    }
}

fn trailing_fakes(newest_timestamp: i64, count: usize, time_resolution: i64, newest: bool) -> Vec<Point> {
    (0..count as i64)
        .rev()
        .map(|offset| Point::fake(newest_timestamp - offset * time_resolution).with_newest(newest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(timestamp: i64, value: Option<f64>) -> Point {
        Point::new(timestamp, value)
    }

    #[test]
    fn test_aligns_series_to_newest_one() {
        let mut series = vec![
            vec![
                p(10, Some(10.0)),
                p(11, Some(11.0)),
                p(12, Some(12.0)),
                p(13, Some(13.0)),
                p(14, Some(14.0)).with_newest(true),
            ],
            vec![
                p(12, Some(12.0)),
                p(13, Some(13.0)),
                p(14, Some(14.0)),
                p(15, Some(15.0)),
                p(16, Some(16.0)),
            ],
            vec![
                p(1, Some(1.0)).with_oldest(true),
                p(2, Some(2.0)),
                p(3, Some(3.0)),
                p(4, Some(4.0)),
                p(5, Some(5.0)),
            ],
            vec![],
            vec![p(11, Some(11.0)), p(12, None), p(13, None), p(14, None), p(15, None)],
            vec![
                Point::fake(11).with_oldest(true),
                Point::fake(12).with_oldest(true),
                Point::fake(13).with_oldest(true),
                Point::fake(14).with_oldest(true),
                p(15, Some(15.0)).with_oldest(true),
            ],
        ];

        reconcile_points_timing(&mut series, 1);

        assert_eq!(
            series,
            vec![
                vec![
                    p(12, Some(12.0)),
                    p(13, Some(13.0)),
                    p(14, Some(14.0)).with_newest(true),
                    Point::fake(15).with_newest(true),
                    Point::fake(16).with_newest(true),
                ],
                vec![
                    p(12, Some(12.0)),
                    p(13, Some(13.0)),
                    p(14, Some(14.0)),
                    p(15, Some(15.0)),
                    p(16, Some(16.0)),
                ],
                vec![
                    Point::fake(12),
                    Point::fake(13),
                    Point::fake(14),
                    Point::fake(15),
                    Point::fake(16),
                ],
                (12..=16)
                    .map(|ts| Point::fake(ts).with_newest(true).with_oldest(true))
                    .collect::<Vec<_>>(),
                vec![p(12, None), p(13, None), p(14, None), p(15, None), Point::fake(16)],
                vec![
                    Point::fake(12).with_oldest(true),
                    Point::fake(13).with_oldest(true),
                    Point::fake(14).with_oldest(true),
                    p(15, Some(15.0)).with_oldest(true),
                    Point::fake(16),
                ],
            ]
        );
    }

    #[test]
    fn test_all_empty_series_stay_empty() {
        let mut series: Vec<Vec<Point>> = vec![vec![], vec![], vec![]];
        reconcile_points_timing(&mut series, 60);
        assert!(series.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_respects_time_resolution() {
        let mut series = vec![
            vec![p(0, Some(1.0)), p(60, Some(2.0))],
            vec![p(60, Some(3.0)), p(120, Some(4.0))],
        ];
        reconcile_points_timing(&mut series, 60);
        assert_eq!(series[0], vec![p(60, Some(2.0)), Point::fake(120)]);
        assert_eq!(series[1], vec![p(60, Some(3.0)), p(120, Some(4.0))]);
    }
}
