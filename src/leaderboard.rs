use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;

use crate::model::{
    DashboardSummary, GroupSummary, LeaderboardEntry, LogFilter, LogRow, StageTally, Verdict,
};
use crate::session::format_elapsed;
use crate::stage::STAGE_COUNT;

// Matches "2 minutes 5 seconds" as well as the older Thai "2 นาที 5 วินาที".
static TIME_USED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*(?:minutes?|นาที)\s*(\d+)\s*(?:seconds?|วินาที)")
        .expect("time pattern is valid")
});

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y, %H:%M:%S",
];

type GroupKey = (String, String);

fn key(row: &LogRow) -> GroupKey {
    (row.group_name.clone(), row.classroom.clone())
}

/// Parses a `time_used` cell into seconds.
pub fn parse_time_used(text: &str) -> Option<u32> {
    let caps = TIME_USED.captures(text)?;
    let minutes: u32 = caps[1].parse().ok()?;
    let seconds: u32 = caps[2].parse().ok()?;
    minutes.checked_mul(60)?.checked_add(seconds)
}

/// Parses a `timestamp` cell. Sheets exports vary, so several layouts are accepted; anything
/// else is treated as missing.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

/// Parses a `stage` cell. Spreadsheets often hand back whole numbers as "5.0".
pub fn parse_stage(text: &str) -> Option<u8> {
    let value: f64 = text.trim().parse().ok()?;
    if value.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&value) {
        return None;
    }
    Some(value as u8)
}

/// Keeps rows whose group and classroom are selected. Empty selections keep everything.
pub fn filter_rows(rows: &[LogRow], filter: &LogFilter) -> Vec<LogRow> {
    rows.iter()
        .filter(|row| filter.groups.is_empty() || filter.groups.contains(&row.group_name))
        .filter(|row| filter.rooms.is_empty() || filter.rooms.contains(&row.classroom))
        .cloned()
        .collect()
}

/// Sorted, de-duplicated, non-empty group names.
pub fn distinct_groups(rows: &[LogRow]) -> Vec<String> {
    distinct(rows.iter().map(|row| row.group_name.as_str()))
}

/// Sorted, de-duplicated, non-empty classrooms.
pub fn distinct_rooms(rows: &[LogRow]) -> Vec<String> {
    distinct(rows.iter().map(|row| row.classroom.as_str()))
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn summarize(rows: &[LogRow]) -> DashboardSummary {
    let groups: HashSet<&str> = rows
        .iter()
        .map(|row| row.group_name.as_str())
        .filter(|g| !g.trim().is_empty())
        .collect();
    DashboardSummary {
        group_count: groups.len(),
        total_records: rows.len(),
        correct: rows
            .iter()
            .filter(|row| row.verdict() == Some(Verdict::Correct))
            .count(),
        incorrect: rows
            .iter()
            .filter(|row| row.verdict() == Some(Verdict::Incorrect))
            .count(),
    }
}

/// Correct and incorrect counts per stage, in stage order. Rows without a stage or a recognised
/// verdict are skipped.
pub fn stage_tallies(rows: &[LogRow]) -> Vec<StageTally> {
    let mut tallies: BTreeMap<u8, StageTally> = BTreeMap::new();
    for row in rows {
        let (Some(stage), Some(verdict)) = (row.stage, row.verdict()) else {
            continue;
        };
        let tally = tallies.entry(stage).or_insert(StageTally {
            stage,
            correct: 0,
            incorrect: 0,
        });
        match verdict {
            Verdict::Correct => tally.correct += 1,
            Verdict::Incorrect => tally.incorrect += 1,
        }
    }
    tallies.into_values().collect()
}

/// Group and classroom pairs with at least one correct record for every stage.
pub fn passed_all(rows: &[LogRow]) -> HashSet<GroupKey> {
    let mut cleared: HashMap<GroupKey, HashSet<u8>> = HashMap::new();
    for row in rows.iter().filter(|row| row.is_correct()) {
        if let Some(stage) = row.stage {
            cleared.entry(key(row)).or_default().insert(stage);
        }
    }
    cleared
        .into_iter()
        .filter(|(_, stages)| (1..=STAGE_COUNT).all(|s| stages.contains(&s)))
        .map(|(k, _)| k)
        .collect()
}

/// Ranks the pairs that cleared every stage by their fastest correct final-stage time.
///
/// Equal times are ordered by the timestamp of the record that set the time (rows without a
/// timestamp last), then by group name and classroom. Pairs without a parsable final-stage time
/// are left out.
pub fn leaderboard(rows: &[LogRow]) -> Vec<LeaderboardEntry> {
    let finishers = passed_all(rows);

    let mut best: HashMap<GroupKey, (u32, Option<NaiveDateTime>)> = HashMap::new();
    for row in rows {
        if row.stage != Some(STAGE_COUNT) || !row.is_correct() {
            continue;
        }
        let k = key(row);
        if !finishers.contains(&k) {
            continue;
        }
        let Some(seconds) = parse_time_used(&row.time_used) else {
            continue;
        };
        let candidate = (seconds, row.timestamp);
        best.entry(k)
            .and_modify(|current| {
                if compare_finish(&candidate, current) == Ordering::Less {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    let mut ranked: Vec<(GroupKey, (u32, Option<NaiveDateTime>))> = best.into_iter().collect();
    ranked.sort_by(|(a_key, a), (b_key, b)| compare_finish(a, b).then_with(|| a_key.cmp(b_key)));

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, ((group_name, classroom), (seconds, _)))| LeaderboardEntry {
            rank: i + 1,
            group_name,
            classroom,
            best_seconds: seconds,
            best_time: format_elapsed(u64::from(seconds)),
        })
        .collect()
}

fn compare_finish(
    a: &(u32, Option<NaiveDateTime>),
    b: &(u32, Option<NaiveDateTime>),
) -> Ordering {
    a.0.cmp(&b.0).then_with(|| timestamps_first(a.1, b.1))
}

/// Orders timestamps ascending with missing timestamps after all present ones.
fn timestamps_first(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// One row per group and classroom holding the most recent correct answer for each stage and the
/// final stage's time.
pub fn group_summaries(rows: &[LogRow]) -> Vec<GroupSummary> {
    let mut correct: Vec<&LogRow> = rows.iter().filter(|row| row.is_correct()).collect();
    // Stable sort: rows without a timestamp go last and keep their sheet order.
    correct.sort_by(|a, b| timestamps_first(a.timestamp, b.timestamp));

    let mut summaries: BTreeMap<GroupKey, GroupSummary> = BTreeMap::new();
    for row in correct {
        let Some(stage) = row.stage.filter(|s| (1..=STAGE_COUNT).contains(s)) else {
            continue;
        };
        let summary = summaries.entry(key(row)).or_insert_with(|| GroupSummary {
            group_name: row.group_name.clone(),
            classroom: row.classroom.clone(),
            answers: vec![None; STAGE_COUNT as usize],
            time_used: None,
        });
        summary.answers[usize::from(stage - 1)] = Some(row.answer.clone());
        if stage == STAGE_COUNT {
            summary.time_used = Some(row.time_used.clone());
        }
    }
    summaries.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(group: &str, room: &str, stage: u8, result: &str, time_used: &str) -> LogRow {
        LogRow {
            group_name: group.to_string(),
            classroom: room.to_string(),
            stage: Some(stage),
            answer: "1".to_string(),
            result: result.to_string(),
            time_used: time_used.to_string(),
            timestamp: None,
        }
    }

    fn at(mut r: LogRow, minute: u32) -> LogRow {
        r.timestamp = NaiveDate::from_ymd_opt(2025, 1, 10)
            .and_then(|d| d.and_hms_opt(9, minute, 0));
        r
    }

    fn full_run(group: &str, room: &str, time_used: &str) -> Vec<LogRow> {
        let mut rows: Vec<LogRow> = (1..=4).map(|s| row(group, room, s, "correct", "")).collect();
        rows.push(row(group, room, 5, "correct", time_used));
        rows
    }

    #[test]
    fn test_parse_time_used() {
        assert_eq!(parse_time_used("2 minutes 5 seconds"), Some(125));
        assert_eq!(parse_time_used("0 minutes 59 seconds"), Some(59));
        assert_eq!(parse_time_used("1 minute 1 second"), Some(61));
        assert_eq!(parse_time_used("12 นาที 3 วินาที"), Some(723));
        assert_eq!(parse_time_used("12นาที3วินาที"), Some(723));
        assert_eq!(parse_time_used(""), None);
        assert_eq!(parse_time_used("soon"), None);
    }

    #[test]
    fn test_parse_stage() {
        assert_eq!(parse_stage("5"), Some(5));
        assert_eq!(parse_stage(" 3.0 "), Some(3));
        assert_eq!(parse_stage("2.5"), None);
        assert_eq!(parse_stage("-1"), None);
        assert_eq!(parse_stage(""), None);
        assert_eq!(parse_stage("five"), None);
    }

    #[test]
    fn test_parse_timestamp() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 10)
            .and_then(|d| d.and_hms_opt(13, 45, 12))
            .unwrap();
        assert_eq!(parse_timestamp("2025-01-10 13:45:12"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-10T13:45:12"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-10T13:45:12Z"), Some(expected));
        assert_eq!(parse_timestamp("10/01/2025 13:45:12"), Some(expected));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_leaderboard_requires_every_stage() {
        let mut rows: Vec<LogRow> = (1..=4).map(|s| row("Owls", "M.3/1", s, "correct", "")).collect();
        rows.push(row("Owls", "M.3/1", 5, "incorrect", "3 minutes 0 seconds"));
        rows.extend(full_run("Foxes", "M.3/2", "4 minutes 10 seconds"));

        let board = leaderboard(&rows);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].group_name, "Foxes");
        assert_eq!(board[0].classroom, "M.3/2");
        assert_eq!(board[0].best_seconds, 250);
        assert_eq!(board[0].best_time, "4 minutes 10 seconds");
        assert_eq!(board[0].rank, 1);
    }

    #[test]
    fn test_leaderboard_excludes_missing_stage() {
        // Correct on 1, 2, 4 and 5 but never on 3.
        let rows: Vec<LogRow> = [1, 2, 4]
            .into_iter()
            .map(|s| row("Owls", "M.3/1", s, "correct", ""))
            .chain([
                row("Owls", "M.3/1", 3, "incorrect", ""),
                row("Owls", "M.3/1", 5, "correct", "1 minutes 0 seconds"),
            ])
            .collect();
        assert!(leaderboard(&rows).is_empty());
        assert!(passed_all(&rows).is_empty());
    }

    #[test]
    fn test_leaderboard_ranks_by_best_time() {
        let mut rows = full_run("Owls", "M.3/1", "5 minutes 0 seconds");
        rows.push(row("Owls", "M.3/1", 5, "correct", "2 minutes 30 seconds"));
        rows.extend(full_run("Foxes", "M.3/2", "3 minutes 0 seconds"));
        rows.extend(full_run("Bears", "M.3/1", "9 นาที 0 วินาที"));

        let board = leaderboard(&rows);
        let order: Vec<&str> = board.iter().map(|e| e.group_name.as_str()).collect();
        assert_eq!(order, vec!["Owls", "Foxes", "Bears"]);
        assert_eq!(board[0].best_seconds, 150);
        assert_eq!(
            board.iter().map(|e| e.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_leaderboard_separates_classrooms() {
        let mut rows = full_run("Owls", "M.3/1", "5 minutes 0 seconds");
        rows.extend(full_run("Owls", "M.3/2", "1 minutes 0 seconds"));
        // Stage 3 in M.3/3 was never cleared.
        rows.push(row("Owls", "M.3/3", 5, "correct", "0 minutes 10 seconds"));

        let board = leaderboard(&rows);
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].classroom, "M.3/2");
        assert_eq!(board[1].classroom, "M.3/1");
    }

    #[test]
    fn test_leaderboard_tie_break() {
        let mut rows = Vec::new();
        for (group, minute) in [("Zebras", 5), ("Ants", 20), ("Cats", 1)] {
            rows.extend(full_run(group, "M.3/1", ""));
            rows.pop();
            rows.push(at(row(group, "M.3/1", 5, "correct", "2 minutes 0 seconds"), minute));
        }
        // No timestamp sorts after every timestamped finish; then by name.
        rows.extend(full_run("Bees", "M.3/1", "2 minutes 0 seconds"));
        rows.extend(full_run("Apes", "M.3/1", "2 minutes 0 seconds"));

        let board = leaderboard(&rows);
        let order: Vec<&str> = board.iter().map(|e| e.group_name.as_str()).collect();
        assert_eq!(order, vec!["Cats", "Zebras", "Ants", "Apes", "Bees"]);
    }

    #[test]
    fn test_leaderboard_accepts_thai_labels() {
        let mut rows: Vec<LogRow> = (1..=4).map(|s| row("Owls", "M.3/1", s, "ถูกต้อง", "")).collect();
        rows.push(row("Owls", "M.3/1", 5, "ถูกต้อง", "3 นาที 7 วินาที"));
        let board = leaderboard(&rows);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].best_seconds, 187);
    }

    #[test]
    fn test_summarize() {
        let rows = vec![
            row("Owls", "M.3/1", 1, "correct", ""),
            row("Owls", "M.3/1", 2, "incorrect", ""),
            row("Foxes", "M.3/2", 1, "ผิด", ""),
            row("", "M.3/2", 1, "", ""),
        ];
        assert_eq!(
            summarize(&rows),
            DashboardSummary {
                group_count: 2,
                total_records: 4,
                correct: 1,
                incorrect: 2,
            }
        );
        assert_eq!(summarize(&[]), DashboardSummary::default());
    }

    #[test]
    fn test_stage_tallies() {
        let mut rows = vec![
            row("Owls", "M.3/1", 2, "correct", ""),
            row("Owls", "M.3/1", 1, "incorrect", ""),
            row("Owls", "M.3/1", 1, "incorrect", ""),
            row("Owls", "M.3/1", 1, "correct", ""),
            row("Owls", "M.3/1", 3, "???", ""),
        ];
        rows.push(LogRow {
            stage: None,
            ..row("Owls", "M.3/1", 1, "correct", "")
        });
        assert_eq!(
            stage_tallies(&rows),
            vec![
                StageTally {
                    stage: 1,
                    correct: 1,
                    incorrect: 2
                },
                StageTally {
                    stage: 2,
                    correct: 1,
                    incorrect: 0
                },
            ]
        );
    }

    #[test]
    fn test_group_summaries_keep_latest_correct_answer() {
        let mut first = at(row("Owls", "M.3/1", 1, "correct", ""), 1);
        first.answer = "100".to_string();
        let mut second = at(row("Owls", "M.3/1", 1, "correct", ""), 9);
        second.answer = "120".to_string();
        let mut wrong = at(row("Owls", "M.3/1", 2, "incorrect", ""), 10);
        wrong.answer = "7".to_string();
        let finish = at(row("Owls", "M.3/1", 5, "correct", "6 minutes 1 seconds"), 12);
        let other = row("Ants", "M.3/2", 3, "correct", "");

        // Out of order on purpose; timestamps decide.
        let summaries = group_summaries(&[second, finish, first, wrong, other]);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].group_name, "Ants");
        assert_eq!(summaries[0].answers[2].as_deref(), Some("1"));
        assert_eq!(summaries[0].time_used, None);

        let owls = &summaries[1];
        assert_eq!(owls.answers[0].as_deref(), Some("120"));
        assert_eq!(owls.answers[1], None);
        assert_eq!(owls.answers[4].as_deref(), Some("1"));
        assert_eq!(owls.time_used.as_deref(), Some("6 minutes 1 seconds"));
    }

    #[test]
    fn test_filter_rows() {
        let rows = vec![
            row("Owls", "M.3/1", 1, "correct", ""),
            row("Foxes", "M.3/1", 1, "correct", ""),
            row("Owls", "M.3/2", 1, "correct", ""),
        ];
        assert_eq!(filter_rows(&rows, &LogFilter::default()).len(), 3);

        let owls = LogFilter {
            groups: vec!["Owls".to_string()],
            rooms: vec![],
        };
        assert_eq!(filter_rows(&rows, &owls).len(), 2);

        let owls_in_m31 = LogFilter {
            groups: vec!["Owls".to_string()],
            rooms: vec!["M.3/1".to_string()],
        };
        let filtered = filter_rows(&rows, &owls_in_m31);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].classroom, "M.3/1");
    }

    #[test]
    fn test_distinct_values() {
        let rows = vec![
            row("Owls", "M.3/2", 1, "correct", ""),
            row("Foxes", "M.3/1", 1, "correct", ""),
            row("Owls", "M.3/1", 1, "correct", ""),
            row(" ", "", 1, "correct", ""),
        ];
        assert_eq!(distinct_groups(&rows), vec!["Foxes", "Owls"]);
        assert_eq!(distinct_rooms(&rows), vec!["M.3/1", "M.3/2"]);
    }
}
