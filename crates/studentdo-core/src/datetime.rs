use anyhow::{
  Context,
  anyhow
};
use chrono::format::{
  Item,
  StrftimeItems
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  Local,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};

/// Display format used when none is
/// configured ("Mar 01, 2026").
pub const DEFAULT_DATE_FORMAT: &str =
  "%b %d, %Y";

/// Parses a due-date expression in the
/// local timezone.
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  parse_date_expr_in(input, now, &Local)
}

#[tracing::instrument(skip(now, tz))]
pub fn parse_date_expr_in<Tz: TimeZone>(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  if token.is_empty() {
    return Err(anyhow!(
      "date expression is empty"
    ));
  }

  let today = now
    .with_timezone(tz)
    .date_naive();

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return local_midnight(
        today, tz, "today"
      );
    }
    | "tomorrow" => {
      return local_midnight(
        today + Duration::days(1),
        tz,
        "tomorrow"
      );
    }
    | "yesterday" => {
      return local_midnight(
        today - Duration::days(1),
        tz,
        "yesterday"
      );
    }
    | _ => {}
  }

  if let Some(offset) =
    parse_relative(&lower)?
  {
    return Ok(now + offset);
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return local_midnight(
      next_weekday_date(today, target),
      tz,
      "weekday-name"
    );
  }

  // Epoch milliseconds, the stored
  // representation.
  if token.len() >= 10
    && token
      .chars()
      .all(|c| c.is_ascii_digit())
  {
    let millis: i64 = token
      .parse()
      .context("invalid epoch millis")?;
    return DateTime::from_timestamp_millis(millis)
      .ok_or_else(|| {
        anyhow!(
          "epoch millis out of range: \
           {millis}"
        )
      });
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_midnight(
      date, tz, "iso-date"
    );
  }

  for pattern in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        token, pattern
      )
    {
      return to_utc(
        naive, tz, "iso-datetime"
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {token}"
  ))
}

#[must_use]
pub fn format_date(
  dt: DateTime<Utc>,
  format: &str
) -> String {
  dt.with_timezone(&Local)
    .format(format)
    .to_string()
}

pub fn validate_date_format(
  format: &str
) -> anyhow::Result<()> {
  if StrftimeItems::new(format)
    .any(|item| {
      matches!(item, Item::Error)
    })
  {
    return Err(anyhow!(
      "invalid date format: {format}"
    ));
  }
  Ok(())
}

fn local_midnight<Tz: TimeZone>(
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
  to_utc(midnight, tz, context)
}

fn to_utc<Tz: TimeZone>(
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
      let first = first.with_timezone(&Utc);
      let second =
        second.with_timezone(&Utc);
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      Ok(first.min(second))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in this timezone: \
         {context}"
      ))
    }
  }
}

/// `+3d`, `-1w`, `+12h`.
fn parse_relative(
  lower: &str
) -> anyhow::Result<Option<Duration>> {
  let (sign, rest) =
    match lower.chars().next() {
      | Some('+') => (1, &lower[1..]),
      | Some('-') => (-1, &lower[1..]),
      | _ => return Ok(None)
    };

  let Some(unit) = rest.chars().last()
  else {
    return Ok(None);
  };
  let digits =
    &rest[..rest.len() - unit.len_utf8()];
  if digits.is_empty()
    || !digits
      .chars()
      .all(|c| c.is_ascii_digit())
  {
    return Ok(None);
  }

  let amount: i64 =
    digits.parse().with_context(|| {
      format!(
        "invalid relative amount: \
         {digits}"
      )
    })?;
  let amount = sign * amount;

  let offset = match unit {
    | 'h' => Duration::hours(amount),
    | 'd' => Duration::days(amount),
    | 'w' => Duration::weeks(amount),
    | other => {
      return Err(anyhow!(
        "unknown relative unit: \
         {other}"
      ));
    }
  };
  Ok(Some(offset))
}

fn parse_weekday_name(
  lower: &str
) -> Option<Weekday> {
  match lower {
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

/// Next occurrence strictly after
/// `today`.
fn next_weekday_date(
  today: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let current = today
    .weekday()
    .num_days_from_monday()
    as i64;
  let wanted =
    target.num_days_from_monday() as i64;
  let mut delta =
    (wanted - current).rem_euclid(7);
  if delta == 0 {
    delta = 7;
  }
  today + Duration::days(delta)
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;

  fn now() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  fn ymd(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
  }

  #[test]
  fn parses_keywords() {
    let today =
      parse_date_expr_in("today", now(), &Utc)
        .expect("today");
    assert_eq!(
      today.format("%Y-%m-%d %H:%M").to_string(),
      "2026-02-17 00:00"
    );
    let tomorrow = parse_date_expr_in(
      "Tomorrow", now(), &Utc
    )
    .expect("tomorrow");
    assert_eq!(ymd(tomorrow), "2026-02-18");
    assert_eq!(
      parse_date_expr_in("now", now(), &Utc)
        .expect("now"),
      now()
    );
  }

  #[test]
  fn parses_weekday_name() {
    // 2026-02-17 is a Tuesday.
    let parsed = parse_date_expr_in(
      "wednesday", now(), &Utc
    )
    .expect("parse weekday");
    assert_eq!(ymd(parsed), "2026-02-18");

    let same_day = parse_date_expr_in(
      "tue", now(), &Utc
    )
    .expect("parse weekday");
    assert_eq!(ymd(same_day), "2026-02-24");
  }

  #[test]
  fn parses_iso_forms() {
    let date = parse_date_expr_in(
      "2026-03-01", now(), &Utc
    )
    .expect("iso date");
    assert_eq!(ymd(date), "2026-03-01");

    let datetime = parse_date_expr_in(
      "2026-03-01T14:30", now(), &Utc
    )
    .expect("iso datetime");
    assert_eq!(
      datetime.format("%H:%M").to_string(),
      "14:30"
    );
  }

  #[test]
  fn parses_relative_offsets() {
    let later = parse_date_expr_in(
      "+3d", now(), &Utc
    )
    .expect("relative");
    assert_eq!(later - now(), Duration::days(3));

    let earlier = parse_date_expr_in(
      "-1w", now(), &Utc
    )
    .expect("relative");
    assert_eq!(now() - earlier, Duration::weeks(1));

    assert!(
      parse_date_expr_in("+3y", now(), &Utc)
        .is_err()
    );
  }

  #[test]
  fn parses_epoch_millis() {
    let millis =
      now().timestamp_millis().to_string();
    let parsed = parse_date_expr_in(
      &millis, now(), &Utc
    )
    .expect("epoch millis");
    assert_eq!(parsed, now());
  }

  #[test]
  fn rejects_garbage() {
    assert!(
      parse_date_expr_in(
        "someday", now(), &Utc
      )
      .is_err()
    );
    assert!(
      parse_date_expr_in("  ", now(), &Utc)
        .is_err()
    );
  }

  #[test]
  fn validates_formats() {
    assert!(
      validate_date_format(
        DEFAULT_DATE_FORMAT
      )
      .is_ok()
    );
    assert!(
      validate_date_format("%Q %Y")
        .is_err()
    );
  }
}
