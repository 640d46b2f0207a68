//! HTML message bodies shared by every notifier.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use subwatch_core::model::{Classification, IdentityStatus, ReportLine};

/// Telegram caps message length; reports are split every this many lines.
pub const REPORT_CHUNK_LINES: usize = 100;

pub const START_MESSAGE: &str = "🟢 <b>subwatch</b> started";
pub const STOP_MESSAGE: &str = "🔴 <b>subwatch</b> stopped";

pub fn channel_url(login: &str) -> String { format!("https://www.twitch.tv/{login}") }

fn badge(classification: Classification) -> &'static str {
  match classification {
    Classification::Partner => "🟣",
    Classification::Affiliate => "🟡",
    Classification::None => "⚪",
  }
}

pub fn escape(text: &str) -> String {
  text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn change_message(status: &IdentityStatus, current: Classification) -> String {
  let login = status.record.as_ref().map_or(status.identity.as_str(), |r| r.login.as_str());
  let available = if current.is_notifiable() { "yes" } else { "no" };
  format!(
    "{badge} <a href=\"{url}\">{name}</a> became <b>{current}</b>\n\nSubscription available: \
     {available}\nLogin: <code>{login}</code>",
    badge = badge(current),
    url = channel_url(login),
    name = escape(status.display_name()),
    login = escape(login),
  )
}

/// Report body as individual lines, grouped by classification with the
/// highest tier first.
pub fn report_lines(lines: &[ReportLine], checks: u64, errors: u64) -> Vec<String> {
  let mut groups: BTreeMap<std::cmp::Reverse<Classification>, Vec<&str>> = BTreeMap::new();
  for line in lines {
    groups.entry(std::cmp::Reverse(line.classification)).or_default().push(&line.identity);
  }

  let mut out = vec![
    "📊 <b>Daily Report</b>".to_owned(),
    format!("Checks: {checks}"),
    format!("Errors: {errors}"),
  ];
  if groups.is_empty() {
    return out;
  }

  out.push(String::new());
  out.push("<b>Statuses:</b>".to_owned());
  for (std::cmp::Reverse(classification), mut identities) in groups {
    identities.sort_unstable();
    out.push(format!("{} <b>{classification}</b> ({})", badge(classification), identities.len()));
    out.extend(identities.into_iter().map(|id| format!("  <code>{}</code>", escape(id))));
  }
  out
}

/// Join `lines` into messages of at most `size` lines each.
pub fn chunk(lines: &[String], size: usize) -> Vec<String> {
  lines.chunks(size.max(1)).map(|c| c.join("\n")).collect()
}

static LINK: LazyLock<Option<Regex>> =
  LazyLock::new(|| Regex::new(r#"<a\s+href="([^"]*)"\s*>(.*?)</a>"#).ok());
static TAG: LazyLock<Option<Regex>> =
  LazyLock::new(|| Regex::new(r"</?(?:b|strong|i|em|u|code|pre)>").ok());

/// Render Telegram HTML for a plain-text sink. Links become `text (url)`.
pub fn html_to_plain(html: &str) -> String {
  let mut text = html.to_owned();
  if let Some(re) = LINK.as_ref() {
    text = re.replace_all(&text, "$2 ($1)").into_owned();
  }
  if let Some(re) = TAG.as_ref() {
    text = re.replace_all(&text, "").into_owned();
  }
  text.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
  use subwatch_core::model::IdentityRecord;

  use super::*;

  fn line(identity: &str, classification: Classification) -> ReportLine {
    ReportLine { identity: identity.into(), classification }
  }

  #[test]
  fn change_message_links_the_channel() {
    let status = IdentityStatus {
      identity:       "alice".into(),
      classification: Classification::Partner,
      record:         Some(IdentityRecord {
        id:             "1".into(),
        login:          "alice".into(),
        display_name:   "Alice".into(),
        classification: Classification::Partner,
      }),
    };
    let msg = change_message(&status, Classification::Partner);
    assert!(msg.starts_with("🟣 <a href=\"https://www.twitch.tv/alice\">Alice</a>"));
    assert!(msg.contains("became <b>partner</b>"));
    assert!(msg.contains("Subscription available: yes"));
    assert!(msg.contains("<code>alice</code>"));
  }

  #[test]
  fn change_message_without_record_uses_identity() {
    let status = IdentityStatus {
      identity:       "bob".into(),
      classification: Classification::Affiliate,
      record:         None,
    };
    let msg = change_message(&status, Classification::Affiliate);
    assert!(msg.starts_with("🟡 <a href=\"https://www.twitch.tv/bob\">bob</a>"));
  }

  #[test]
  fn report_groups_highest_tier_first() {
    let lines = report_lines(
      &[
        line("c", Classification::None),
        line("b", Classification::Partner),
        line("a", Classification::None),
        line("d", Classification::Affiliate),
      ],
      12,
      1,
    );
    assert_eq!(lines[..3], ["📊 <b>Daily Report</b>", "Checks: 12", "Errors: 1"]);
    assert_eq!(lines[4], "<b>Statuses:</b>");
    assert_eq!(lines[5], "🟣 <b>partner</b> (1)");
    assert_eq!(lines[6], "  <code>b</code>");
    assert_eq!(lines[7], "🟡 <b>affiliate</b> (1)");
    assert_eq!(lines[9], "⚪ <b>none</b> (2)");
    assert_eq!(lines[10..], ["  <code>a</code>", "  <code>c</code>"]);
  }

  #[test]
  fn empty_report_has_only_the_header() {
    assert_eq!(report_lines(&[], 0, 0).len(), 3);
  }

  #[test]
  fn chunks_split_on_line_boundaries() {
    let lines: Vec<String> = (0..250).map(|i| i.to_string()).collect();
    let chunks = chunk(&lines, REPORT_CHUNK_LINES);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].lines().count(), 100);
    assert_eq!(chunks[2].lines().count(), 50);
    assert!(chunks[1].starts_with("100\n"));
    assert!(chunk(&[], REPORT_CHUNK_LINES).is_empty());
  }

  #[test]
  fn html_is_flattened_for_the_console() {
    let plain = html_to_plain(
      "🟣 <a href=\"https://www.twitch.tv/a\">A &amp; B</a> became <b>partner</b> <code>a</code>",
    );
    assert_eq!(plain, "🟣 A & B (https://www.twitch.tv/a) became partner a");
    assert_eq!(html_to_plain(START_MESSAGE), "🟢 subwatch started");
  }
}
