use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{self, char, space1},
    combinator::{map, opt, recognize, verify},
    multi::separated_list1,
    sequence::{pair, preceded, separated_pair},
    IResult,
};
use thiserror::Error;

use crate::{CronEntry, CronOptions, CronTimer, CronValue};

/// Error produced while parsing a schedule definition.
#[derive(Error, Debug)]
pub enum ScheduleParseError {
    #[error("invalid cron expression on line {line}: {msg}")]
    Syntax { line: usize, msg: String },
    #[error("unknown option '{option}' on line {line}")]
    UnknownOption { line: usize, option: String },
    #[error("invalid value '{value}' for option '{option}' on line {line}")]
    BadOptionValue {
        line: usize,
        option: String,
        value: String,
    },
    #[error("invalid args object on line {line}: {source}")]
    BadArgs {
        line: usize,
        source: serde_json::Error,
    },
}

/// The five pattern fields, each with its own value boundaries.
#[derive(Debug, Clone, Copy)]
enum Part {
    Minute,
    Hour,
    Day,
    Month,
    Dow,
}

impl Part {
    fn boundaries(&self) -> (u32, u32) {
        match self {
            Part::Minute => (0, 59),
            Part::Hour => (0, 23),
            Part::Day => (1, 31),
            Part::Month => (1, 12),
            Part::Dow => (0, 6),
        }
    }
}

fn cron_number<'a>(part: Part) -> impl Fn(&'a str) -> IResult<&'a str, u32> {
    let (min, max) = part.boundaries();
    move |input| verify(complete::u32, |v| v >= &min && v <= &max)(input)
}

fn cron_range<'a>(part: Part) -> impl Fn(&'a str) -> IResult<&'a str, (u32, u32)> {
    move |input| {
        verify(
            separated_pair(cron_number(part), char('-'), cron_number(part)),
            |(left, right)| left < right,
        )(input)
    }
}

fn cron_wildcard<'a>(part: Part) -> impl Fn(&'a str) -> IResult<&'a str, Option<u32>> {
    move |input| {
        preceded(
            char('*'),
            opt(preceded(
                char('/'),
                verify(cron_number(part), |divider| divider >= &1),
            )),
        )(input)
    }
}

fn cron_value<'a>(part: Part) -> impl Fn(&'a str) -> IResult<&'a str, CronValue> {
    move |input| {
        alt((
            map(cron_range(part), |(left, right)| {
                CronValue::Range(left, right)
            }),
            map(cron_wildcard(part), |divider| match divider {
                Some(d) => CronValue::Step(d),
                None => CronValue::Any,
            }),
            map(cron_number(part), CronValue::Number),
        ))(input)
    }
}

fn cron_values<'a>(part: Part) -> impl Fn(&'a str) -> IResult<&'a str, Vec<CronValue>> {
    move |input| separated_list1(char(','), cron_value(part))(input)
}

fn cron_timer(input: &str) -> IResult<&str, CronTimer> {
    let (input, minutes) = cron_values(Part::Minute)(input)?;
    let (input, _) = space1(input)?;
    let (input, hours) = cron_values(Part::Hour)(input)?;
    let (input, _) = space1(input)?;
    let (input, days) = cron_values(Part::Day)(input)?;
    let (input, _) = space1(input)?;
    let (input, months) = cron_values(Part::Month)(input)?;
    let (input, _) = space1(input)?;
    let (input, dows) = cron_values(Part::Dow)(input)?;

    Ok((
        input,
        CronTimer {
            minutes,
            hours,
            days,
            months,
            dows,
        },
    ))
}

/// Worker identifiers start with a letter or underscore and contain only
/// alphanumerics, colon, underscore and hyphen.
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-'),
    ))(input)
}

fn option_pair(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        char('='),
        take_while1(|c: char| c != '&' && c != ' ' && c != '\t'),
    )(input)
}

fn raw_options(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    preceded(char('?'), separated_list1(tag("&"), option_pair))(input)
}

fn build_options(line: usize, pairs: Vec<(&str, &str)>) -> Result<CronOptions, ScheduleParseError> {
    let mut options = CronOptions::default();
    for (key, value) in pairs {
        match key {
            "id" => options.id = Some(value.to_string()),
            "queue" => options.queue = Some(value.to_string()),
            "max" => {
                options.max = Some(value.parse().map_err(|_| {
                    ScheduleParseError::BadOptionValue {
                        line,
                        option: key.to_string(),
                        value: value.to_string(),
                    }
                })?)
            }
            "priority" => {
                options.priority = Some(value.parse().map_err(|_| {
                    ScheduleParseError::BadOptionValue {
                        line,
                        option: key.to_string(),
                        value: value.to_string(),
                    }
                })?)
            }
            other => {
                return Err(ScheduleParseError::UnknownOption {
                    line,
                    option: other.to_string(),
                })
            }
        }
    }
    Ok(options)
}

fn parse_line(line_no: usize, line: &str) -> Result<CronEntry, ScheduleParseError> {
    let syntax = |msg: String| ScheduleParseError::Syntax { line: line_no, msg };

    let (rest, timer) = cron_timer(line).map_err(|e| syntax(format!("{e}")))?;
    let (rest, _) = space1::<_, nom::error::Error<&str>>(rest)
        .map_err(|_| syntax("expected worker identifier after time pattern".into()))?;
    let (rest, worker) = identifier(rest).map_err(|e| syntax(format!("{e}")))?;

    let rest = rest.trim_start();
    let (rest, options) = match raw_options(rest) {
        Ok((rest, pairs)) => (rest, build_options(line_no, pairs)?),
        Err(_) => (rest, CronOptions::default()),
    };

    let rest = rest.trim_start();
    let args = if rest.is_empty() {
        None
    } else {
        let value: serde_json::Value = serde_json::from_str(rest)
            .map_err(|source| ScheduleParseError::BadArgs {
                line: line_no,
                source,
            })?;
        if !value.is_object() {
            return Err(syntax("args template must be a JSON object".into()));
        }
        Some(value)
    };

    Ok(CronEntry {
        timer,
        worker: worker.to_string(),
        options,
        args,
    })
}

/// Parse a full schedule definition into its rules.
///
/// Blank lines and lines starting with `#` are skipped. Any malformed line
/// fails the whole parse; a schedule is either fully valid or rejected.
///
/// ```rust
/// use conveyor_schedule::parse_cron;
///
/// let entries = parse_cron("*/5 * * * * refresh_feeds ?queue=feeds {\"source\": \"all\"}").unwrap();
/// assert_eq!(entries.len(), 1);
/// assert_eq!(entries[0].worker(), "refresh_feeds");
/// ```
pub fn parse_cron(input: &str) -> Result<Vec<CronEntry>, ScheduleParseError> {
    let mut entries = Vec::new();
    for (index, raw_line) in input.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        entries.push(parse_line(index + 1, line)?);
    }
    Ok(entries)
}
