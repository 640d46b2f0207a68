//! Routing keys for the topic exchange.
//!
//! A key is derived from the event type name by splitting on case boundaries:
//! the first word becomes the entity segment and the rest are joined with
//! `-` (`LoopCheckFailed` → `domain.loop.check-failed`).

use subwatch_core::event::{EventKind, Topic};

pub const ROUTING_PREFIX: &str = "domain";

/// Routing key for one event kind.
pub fn routing_key(kind: EventKind) -> String { key_for_name(kind.name()) }

/// Binding pattern for a subscription topic. `Topic::All` binds `domain.#`.
pub fn topic_routing_key(topic: Topic) -> String {
  match topic {
    Topic::Kind(kind) => routing_key(kind),
    Topic::All => format!("{ROUTING_PREFIX}.#"),
  }
}

fn key_for_name(name: &str) -> String {
  let words = split_words(name);
  let mut key = String::from(ROUTING_PREFIX);
  if let Some((first, rest)) = words.split_first() {
    key.push('.');
    key.push_str(first);
    if !rest.is_empty() {
      key.push('.');
      key.push_str(&rest.join("-"));
    }
  }
  key
}

/// Split a CamelCase name into lowercase words. Acronyms stay together
/// (`HTTPServer` → `http`, `server`) and digit runs form their own word.
fn split_words(name: &str) -> Vec<String> {
  let chars: Vec<char> = name.chars().collect();
  let mut words = Vec::new();
  let mut current = String::new();

  for (i, &c) in chars.iter().enumerate() {
    if !c.is_alphanumeric() {
      if !current.is_empty() {
        words.push(std::mem::take(&mut current));
      }
      continue;
    }
    let boundary = i > 0 && !current.is_empty() && {
      let prev = chars[i - 1];
      let next = chars.get(i + 1).copied();
      (c.is_uppercase() && (prev.is_lowercase() || prev.is_ascii_digit()))
        || (c.is_uppercase()
          && prev.is_uppercase()
          && next.is_some_and(char::is_lowercase))
        || (c.is_ascii_digit() != prev.is_ascii_digit())
    };
    if boundary {
      words.push(std::mem::take(&mut current));
    }
    current.extend(c.to_lowercase());
  }
  if !current.is_empty() {
    words.push(current);
  }
  words
}

/// AMQP topic matching: `*` matches one word, `#` matches zero or more.
pub fn topic_matches(pattern: &str, key: &str) -> bool {
  let pattern: Vec<&str> = pattern.split('.').collect();
  let key: Vec<&str> = key.split('.').collect();
  matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
  match pattern.split_first() {
    None => key.is_empty(),
    Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
    Some((&word, rest)) => match key.split_first() {
      Some((&k, key_rest)) => (word == "*" || word == k) && matches_words(rest, key_rest),
      None => false,
    },
  }
}
