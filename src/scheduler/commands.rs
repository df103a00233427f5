//! Parser for the `/schedule` command grammar and the natural-language
//! scheduling cue used when a chat message isn't a slash command.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSchedule {
    At(DateTime<Utc>),
    Daily(NaiveTime),
    Every(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleCommand {
    pub schedule: ParsedSchedule,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Schedule(ScheduleCommand),
    ListScheduled,
    Unschedule(String),
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    NotACommand,
    MissingInstruction,
    MalformedSpec(String),
}

/// Parses a full `/schedule`, `/scheduled_tasks`, `/unschedule_task`, or
/// `/schedule help` line. `now` anchors relative specs like `in 5m`.
pub fn parse_command(line: &str, now: DateTime<Utc>) -> Result<Command, ParseError> {
    let line = line.trim();
    if line == "/schedule help" {
        return Ok(Command::Help);
    }
    if line == "/scheduled_tasks" {
        return Ok(Command::ListScheduled);
    }
    if let Some(rest) = line.strip_prefix("/unschedule_task ") {
        let id_prefix = rest.trim();
        if id_prefix.is_empty() {
            return Err(ParseError::MalformedSpec("missing id prefix".to_string()));
        }
        return Ok(Command::Unschedule(id_prefix.to_string()));
    }
    if let Some(rest) = line.strip_prefix("/schedule ") {
        let (spec, instruction) = rest
            .split_once('|')
            .ok_or(ParseError::MissingInstruction)
            .map(|(s, i)| (s.trim(), i.trim().to_string()))?;
        if instruction.is_empty() {
            return Err(ParseError::MissingInstruction);
        }
        let schedule = parse_spec(spec, now)?;
        return Ok(Command::Schedule(ScheduleCommand { schedule, instruction }));
    }
    Err(ParseError::NotACommand)
}

/// Parses just the `<spec>` grammar: `tomorrow H[:MM]am|pm`, `today
/// H[:MM]am|pm`, `daily HH:MM`, `every N[m|h]`, `in N[s|m|h]`.
pub fn parse_spec(spec: &str, now: DateTime<Utc>) -> Result<ParsedSchedule, ParseError> {
    let spec = spec.trim();

    if let Some(rest) = spec.strip_prefix("daily ") {
        let time = parse_hh_mm(rest.trim())?;
        return Ok(ParsedSchedule::Daily(time));
    }
    if let Some(rest) = spec.strip_prefix("every ") {
        let duration = parse_count_unit(rest.trim(), &["m", "h"])?;
        return Ok(ParsedSchedule::Every(duration));
    }
    if let Some(rest) = spec.strip_prefix("in ") {
        let duration = parse_count_unit(rest.trim(), &["s", "m", "h"])?;
        return Ok(ParsedSchedule::At(now + duration));
    }
    if let Some(rest) = spec.strip_prefix("tomorrow ") {
        let time = parse_h_mm_ampm(rest.trim())?;
        let day = now.date_naive() + Duration::days(1);
        return Ok(ParsedSchedule::At(day.and_time(time).and_utc()));
    }
    if let Some(rest) = spec.strip_prefix("today ") {
        let time = parse_h_mm_ampm(rest.trim())?;
        let mut at = now.date_naive().and_time(time).and_utc();
        if at <= now {
            at += Duration::days(1);
        }
        return Ok(ParsedSchedule::At(at));
    }

    Err(ParseError::MalformedSpec(spec.to_string()))
}

fn parse_hh_mm(s: &str) -> Result<NaiveTime, ParseError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ParseError::MalformedSpec(s.to_string()))
}

fn parse_count_unit(s: &str, allowed_units: &[&str]) -> Result<Duration, ParseError> {
    let unit_start = s.find(|c: char| c.is_alphabetic()).ok_or_else(|| ParseError::MalformedSpec(s.to_string()))?;
    let (count_str, unit) = s.split_at(unit_start);
    if !allowed_units.contains(&unit) {
        return Err(ParseError::MalformedSpec(s.to_string()));
    }
    let count: i64 = count_str.trim().parse().map_err(|_| ParseError::MalformedSpec(s.to_string()))?;
    match unit {
        "s" => Ok(Duration::seconds(count)),
        "m" => Ok(Duration::minutes(count)),
        "h" => Ok(Duration::hours(count)),
        _ => Err(ParseError::MalformedSpec(s.to_string())),
    }
}

fn parse_h_mm_ampm(s: &str) -> Result<NaiveTime, ParseError> {
    let lower = s.to_ascii_lowercase();
    let (digits, is_pm) = if let Some(d) = lower.strip_suffix("am") {
        (d.trim(), false)
    } else if let Some(d) = lower.strip_suffix("pm") {
        (d.trim(), true)
    } else {
        return Err(ParseError::MalformedSpec(s.to_string()));
    };

    let (hour_str, minute_str) = digits.split_once(':').unwrap_or((digits, "0"));
    let mut hour: u32 = hour_str.parse().map_err(|_| ParseError::MalformedSpec(s.to_string()))?;
    let minute: u32 = minute_str.parse().map_err(|_| ParseError::MalformedSpec(s.to_string()))?;
    if !(1..=12).contains(&hour) {
        return Err(ParseError::MalformedSpec(s.to_string()));
    }
    if is_pm && hour != 12 {
        hour += 12;
    } else if !is_pm && hour == 12 {
        hour = 0;
    }
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| ParseError::MalformedSpec(s.to_string()))
}

const TEMPORAL_CUES: &[&str] = &["today", "tomorrow", "in "];
const SCHEDULE_VERBS: &[&str] = &["at", "schedule", "remind", "run", "send", "deliver", "do"];

/// Detects whether a plain chat message (not a slash command) reads as a
/// natural-language scheduling request: a temporal cue co-occurring with
/// a schedule verb.
pub fn looks_like_natural_language_schedule(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    let has_temporal_cue = TEMPORAL_CUES.iter().any(|cue| lower.contains(cue));
    let has_schedule_verb = SCHEDULE_VERBS.iter().any(|verb| {
        lower.split_whitespace().any(|word| word.trim_matches(|c: char| !c.is_alphanumeric()) == *verb)
    });
    has_temporal_cue && has_schedule_verb
}
