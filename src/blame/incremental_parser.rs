use std::{ops::Range, path::PathBuf, sync::LazyLock};

use chrono::TimeZone;
use log::*;
use regex::Regex;

use super::{BlameError, BlameEvent, CommitInfo, GitPerson};

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{40}|[0-9a-f]{64}) (\d+) (\d+) (\d+)$").expect("valid regex")
});

/// A record of the `git blame --incremental` output, from the header line
/// to the `filename` line.
#[derive(Debug, Default)]
struct Record {
    hash: String,
    /// The line numbers in the final file.
    lines: Range<usize>,
    commit: CommitInfo,
    has_metadata: bool,
}

impl Record {
    fn into_events(self) -> impl Iterator<Item = BlameEvent> {
        let commit = self.has_metadata.then(|| BlameEvent::Commit {
            hash: self.hash.clone(),
            info: self.commit,
        });
        let hash = self.hash;
        let lines = self.lines.map(move |line_number| {
            BlameEvent::Line {
                line_number,
                hash: hash.clone(),
            }
        });
        commit.into_iter().chain(lines)
    }
}

/// Parses the output of `git blame --incremental` line by line
/// into `BlameEvent::Commit` and `BlameEvent::Line`.
///
/// The commit metadata appears only in the first record of each commit.
/// `Commit` is emitted when that record is closed,
/// followed by `Line` for each line in the record.
#[derive(Debug, Default)]
pub struct IncrementalParser {
    record: Option<Record>,
    line_number: usize,
}

impl IncrementalParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line without the trailing newline.
    pub fn parse_line(
        &mut self,
        line: &str,
        emit: &mut impl FnMut(BlameEvent),
    ) -> Result<(), BlameError> {
        self.line_number += 1;
        let Some(record) = self.record.as_mut() else {
            self.record = Some(self.parse_header(line)?);
            return Ok(());
        };

        let (key, value) = line.split_once(' ').unwrap_or((line, ""));
        let commit = &mut record.commit;
        match key {
            "author" => commit.author.name = value.to_string(),
            "author-mail" => commit.author.mail = Self::trim_mail(value),
            "author-time" => Self::set_time(&mut commit.author, value, self.line_number)?,
            "author-tz" => Self::set_time_zone(&mut commit.author, value, self.line_number)?,
            "committer" => commit.committer.name = value.to_string(),
            "committer-mail" => commit.committer.mail = Self::trim_mail(value),
            "committer-time" => Self::set_time(&mut commit.committer, value, self.line_number)?,
            "committer-tz" => {
                Self::set_time_zone(&mut commit.committer, value, self.line_number)?
            }
            "summary" => commit.summary = value.to_string(),
            "boundary" => commit.is_boundary = true,
            "previous" => {
                let (hash, path) = value.split_once(' ').ok_or_else(|| {
                    BlameError::parse(self.line_number, format!("Invalid previous: {value:?}"))
                })?;
                commit.previous = Some((hash.to_string(), PathBuf::from(path)));
            }
            "filename" => {
                commit.filename = PathBuf::from(value);
                if let Some(record) = self.record.take() {
                    trace!("record: {} {:?}", record.hash, record.lines);
                    record.into_events().for_each(&mut *emit);
                }
                return Ok(());
            }
            _ => {
                trace!("parse_line: unknown key {key:?} skipped");
                return Ok(());
            }
        }
        if key != "previous" && key != "boundary" {
            record.has_metadata = true;
        }
        Ok(())
    }

    /// Check the stream ended at a record boundary.
    pub fn finish(&self) -> Result<(), BlameError> {
        if let Some(record) = &self.record {
            return Err(BlameError::parse(
                self.line_number,
                format!("The record for {} is not closed", record.hash),
            ));
        }
        Ok(())
    }

    fn parse_header(&self, line: &str) -> Result<Record, BlameError> {
        let captures = HEADER_RE.captures(line).ok_or_else(|| {
            BlameError::parse(self.line_number, format!("Invalid header: {line:?}"))
        })?;
        let number = |index: usize| -> Result<usize, BlameError> {
            captures[index]
                .parse()
                .map_err(|error| BlameError::parse(self.line_number, format!("{error}")))
        };
        let result_line = number(3)?;
        if result_line == 0 {
            return Err(BlameError::parse(self.line_number, "Line numbers are 1-based"));
        }
        let end_line = result_line.checked_add(number(4)?).ok_or_else(|| {
            BlameError::parse(self.line_number, format!("Too many lines: {line:?}"))
        })?;
        Ok(Record {
            hash: captures[1].to_string(),
            lines: result_line..end_line,
            ..Default::default()
        })
    }

    fn trim_mail(value: &str) -> String {
        value
            .strip_prefix('<')
            .and_then(|value| value.strip_suffix('>'))
            .unwrap_or(value)
            .to_string()
    }

    fn set_time(person: &mut GitPerson, value: &str, line_number: usize) -> Result<(), BlameError> {
        let seconds: i64 = value
            .parse()
            .map_err(|_| BlameError::parse(line_number, format!("Invalid time: {value:?}")))?;
        // The offset is applied when the time zone line follows.
        let time = chrono::Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| BlameError::parse(line_number, format!("Invalid time: {value:?}")))?;
        person.time = Some(time.fixed_offset());
        Ok(())
    }

    fn set_time_zone(
        person: &mut GitPerson,
        value: &str,
        line_number: usize,
    ) -> Result<(), BlameError> {
        let offset = Self::parse_time_zone(value)
            .ok_or_else(|| BlameError::parse(line_number, format!("Invalid time zone: {value:?}")))?;
        if let Some(time) = person.time {
            person.time = Some(time.with_timezone(&offset));
        }
        Ok(())
    }

    /// Parse `+hhmm` or `-hhmm`.
    fn parse_time_zone(value: &str) -> Option<chrono::FixedOffset> {
        if value.len() != 5 || !value.is_ascii() {
            return None;
        }
        let sign = match &value[..1] {
            "+" => 1,
            "-" => -1,
            _ => return None,
        };
        let hours: i32 = value[1..3].parse().ok()?;
        let minutes: i32 = value[3..5].parse().ok()?;
        chrono::FixedOffset::east_opt(sign * (hours * 60 + minutes) * 60)
    }
}
