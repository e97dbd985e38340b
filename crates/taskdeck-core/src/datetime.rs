use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "taskdeck-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "TASKDECK_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "TASKDECK_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Timezone that decides where "today" starts and how local date
/// expressions are read. Resolved once per process.
pub fn local_timezone() -> &'static Tz {
  static LOCAL_TZ: OnceLock<Tz> =
    OnceLock::new();
  LOCAL_TZ
    .get_or_init(resolve_local_timezone)
}

/// Start of the calendar day containing `now`, in the configured
/// timezone. This is the boundary between Overdue and Upcoming.
pub fn start_of_day(
  now: DateTime<Utc>
) -> DateTime<Utc> {
  start_of_day_in(now, local_timezone())
}

pub fn start_of_day_in(
  now: DateTime<Utc>,
  tz: &Tz
) -> DateTime<Utc> {
  let midnight = now
    .with_timezone(tz)
    .date_naive()
    .and_hms_opt(0, 0, 0)
    .unwrap_or_default();
  match tz.from_local_datetime(&midnight) {
    | LocalResult::Single(dt) => {
      dt.with_timezone(&Utc)
    }
    | LocalResult::Ambiguous(first, _) => {
      first.with_timezone(&Utc)
    }
    // Midnight skipped by a DST jump: the day starts at the first
    // instant that exists.
    | LocalResult::None => {
      (1..=4)
        .filter_map(|hours| {
          tz.from_local_datetime(
            &(midnight
              + Duration::hours(hours))
          )
          .earliest()
        })
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
    }
  }
}

/// `Oct 19, 2026`, the date label used in listings.
#[must_use]
pub fn format_display_date(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(local_timezone())
    .format("%b %-d, %Y")
    .to_string()
}

#[must_use]
pub fn format_display_datetime(
  dt: DateTime<Utc>
) -> String {
  dt.with_timezone(local_timezone())
    .format("%b %-d, %Y %H:%M")
    .to_string()
}

fn resolve_local_timezone() -> Tz {
  let from_env = std::env::var(
    TIMEZONE_ENV_VAR
  )
  .ok()
  .and_then(|raw| {
    parse_timezone(&raw, TIMEZONE_ENV_VAR)
  });

  from_env
    .or_else(timezone_from_file)
    .unwrap_or_else(|| {
      tracing::debug!(
        "no timezone configured; using UTC"
      );
      chrono_tz::UTC
    })
}

/// `$TASKDECK_TIME_CONFIG`, else `taskdeck-time.toml` in the
/// working directory. Accepts `timezone = ".."` at the top level
/// or under `[time]`.
fn timezone_from_file() -> Option<Tz> {
  let path = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  )
  .ok()
  .map(|raw| raw.trim().to_string())
  .filter(|raw| !raw.is_empty())
  .map(PathBuf::from)
  .or_else(|| {
    std::env::current_dir()
      .ok()
      .map(|dir| dir.join(TIMEZONE_CONFIG_FILE))
  })?;

  if !path.exists() {
    return None;
  }

  let parsed = fs::read_to_string(&path)
    .map_err(|err| err.to_string())
    .and_then(|raw| {
      toml::from_str::<TimezoneConfig>(&raw)
        .map_err(|err| err.to_string())
    });
  let config = match parsed {
    | Ok(config) => config,
    | Err(error) => {
      tracing::error!(
        file = %path.display(),
        %error,
        "ignoring unreadable timezone file"
      );
      return None;
    }
  };

  let source =
    format!("file:{}", path.display());
  config
    .timezone
    .or_else(|| {
      config.time.and_then(|t| t.timezone)
    })
    .and_then(|tz| parse_timezone(&tz, &source))
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  match raw.trim().parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %tz,
        "configured local timezone"
      );
      Some(tz)
    }
    | Err(error) => {
      tracing::error!(
        source,
        timezone = raw.trim(),
        %error,
        "ignoring unknown timezone id"
      );
      None
    }
  }
}

fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: &Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      Ok(first.min(second).with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in configured \
         timezone: {context}"
      ))
    }
  }
}

#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  parse_date_expr_in(
    input,
    now,
    local_timezone()
  )
}

pub fn parse_date_expr_in(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return Ok(start_of_day_in(now, tz));
    }
    | "tomorrow" => {
      return local_day_offset(now, tz, 1);
    }
    | "yesterday" => {
      return local_day_offset(now, tz, -1);
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    let local_today = now
      .with_timezone(tz)
      .date_naive();
    let target_date = next_weekday_date(
      local_today,
      target_weekday
    );
    return local_midnight(
      target_date,
      tz,
      "weekday-name"
    );
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[wdhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: i64 = caps["num"]
      .parse()
      .context(
        "invalid relative number"
      )?;
    let duration = match &caps["unit"] {
      | "w" => Duration::try_weeks(num),
      | "d" => Duration::try_days(num),
      | "h" => Duration::try_hours(num),
      | _ => Duration::try_minutes(num)
    };
    let shifted =
      duration.and_then(|duration| {
        if &caps["sign"] == "-" {
          now.checked_sub_signed(duration)
        } else {
          now.checked_add_signed(duration)
        }
      });

    return shifted.ok_or_else(|| {
      anyhow!(
        "date out of range: {token}"
      )
    });
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_midnight(
      date, tz, "date"
    );
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        ndt, tz, fmt
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     +Nw/+Nd/+Nh/+Nm, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

fn local_day_offset(
  now: DateTime<Utc>,
  tz: &Tz,
  days: i64
) -> anyhow::Result<DateTime<Utc>> {
  let today =
    now.with_timezone(tz).date_naive();
  let target = today
    .checked_add_signed(Duration::days(
      days
    ))
    .ok_or_else(|| {
      anyhow!(
        "date out of range: {days} \
         days from {today}"
      )
    })?;
  local_midnight(target, tz, "day-offset")
}

fn local_midnight(
  date: NaiveDate,
  tz: &Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {context}"
      )
    })?;
  to_utc_from_local(midnight, tz, context)
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

/// Persisted dates: RFC 3339 in UTC with millisecond precision,
/// e.g. `2026-10-19T00:00:00.000Z`.
pub mod iso_date_serde {
  use chrono::{
    DateTime,
    NaiveDate,
    NaiveDateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.to_rfc3339_opts(
        SecondsFormat::Millis,
        true
      )
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    parse(&raw).ok_or_else(|| {
      serde::de::Error::custom(format!(
        "invalid ISO-8601 date: {raw}"
      ))
    })
  }

  pub(crate) fn parse(
    raw: &str
  ) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) =
      DateTime::parse_from_rfc3339(raw)
    {
      return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        raw,
        "%Y-%m-%dT%H:%M:%S%.f"
      )
    {
      return Some(ndt.and_utc());
    }
    NaiveDate::parse_from_str(
      raw, "%Y-%m-%d"
    )
    .ok()
    .and_then(|date| {
      date.and_hms_opt(0, 0, 0)
    })
    .map(|ndt| ndt.and_utc())
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };
  use chrono_tz::Tz;

  use super::{
    iso_date_serde,
    parse_date_expr_in,
    start_of_day_in
  };

  fn berlin() -> Tz {
    "Europe/Berlin"
      .parse()
      .expect("valid tz")
  }

  #[test]
  fn start_of_day_respects_timezone() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 23, 30, 0
      )
      .single()
      .expect("valid now");
    assert_eq!(
      start_of_day_in(now, &chrono_tz::UTC),
      Utc
        .with_ymd_and_hms(2026, 10, 18, 0, 0, 0)
        .unwrap()
    );
    // 01:30 on the 19th in Berlin (CEST, UTC+2).
    assert_eq!(
      start_of_day_in(now, &berlin()),
      Utc
        .with_ymd_and_hms(2026, 10, 18, 22, 0, 0)
        .unwrap()
    );
  }

  #[test]
  fn parses_relative_day_words() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let tomorrow = parse_date_expr_in(
      "tomorrow",
      now,
      &chrono_tz::UTC
    )
    .expect("parse tomorrow");
    assert_eq!(
      tomorrow,
      Utc
        .with_ymd_and_hms(2026, 10, 19, 0, 0, 0)
        .unwrap()
    );
    let yesterday = parse_date_expr_in(
      "Yesterday",
      now,
      &chrono_tz::UTC
    )
    .expect("parse yesterday");
    assert_eq!(
      yesterday,
      Utc
        .with_ymd_and_hms(2026, 10, 17, 0, 0, 0)
        .unwrap()
    );
  }

  #[test]
  fn parses_weekday_name() {
    // 2026-10-18 is a Sunday.
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .single()
      .expect("valid now");
    let parsed = parse_date_expr_in(
      "wednesday",
      now,
      &chrono_tz::UTC
    )
    .expect("parse weekday");
    assert_eq!(
      parsed.format("%Y-%m-%d").to_string(),
      "2026-10-21"
    );
  }

  #[test]
  fn parses_offsets_and_local_dates() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .single()
      .expect("valid now");
    assert_eq!(
      parse_date_expr_in("+2w", now, &chrono_tz::UTC)
        .expect("parse weeks"),
      now + chrono::Duration::days(14)
    );
    assert_eq!(
      parse_date_expr_in("-3h", now, &chrono_tz::UTC)
        .expect("parse hours"),
      now - chrono::Duration::hours(3)
    );
    assert_eq!(
      parse_date_expr_in(
        "2026-12-01",
        now,
        &berlin()
      )
      .expect("parse date"),
      Utc
        .with_ymd_and_hms(2026, 11, 30, 23, 0, 0)
        .unwrap()
    );
    assert!(
      parse_date_expr_in(
        "someday",
        now,
        &chrono_tz::UTC
      )
      .is_err()
    );
  }

  #[test]
  fn huge_offsets_are_errors_not_panics() {
    let now = Utc
      .with_ymd_and_hms(
        2026, 10, 18, 12, 0, 0
      )
      .single()
      .expect("valid now");
    for expr in [
      "+100000000d",
      "-100000000d",
      "+99999999999999w",
      "+9223372036854775807m"
    ] {
      let err = parse_date_expr_in(
        expr,
        now,
        &chrono_tz::UTC
      )
      .expect_err("out of range");
      assert!(
        err
          .to_string()
          .contains("out of range"),
        "{expr}: {err:#}"
      );
    }
    assert!(
      parse_date_expr_in(
        "+99999999999999999999d",
        now,
        &chrono_tz::UTC
      )
      .is_err()
    );
  }

  #[test]
  fn iso_parse_accepts_offsets_and_bare_dates() {
    assert_eq!(
      iso_date_serde::parse(
        "2026-10-19T02:00:00.000+02:00"
      ),
      Some(
        Utc
          .with_ymd_and_hms(2026, 10, 19, 0, 0, 0)
          .unwrap()
      )
    );
    assert_eq!(
      iso_date_serde::parse("2026-10-19"),
      Some(
        Utc
          .with_ymd_and_hms(2026, 10, 19, 0, 0, 0)
          .unwrap()
      )
    );
    assert_eq!(
      iso_date_serde::parse("not a date"),
      None
    );
  }
}
