//! Moderation commands accepted in the privileged support channel.

use crate::blocklist::BlockRegistry;
use crate::error::StoreError;
use crate::history::HistoryLog;
use crate::models::block::{BlockDuration, BlockStatus};
use crate::models::history::Direction;

/// Discord message size cap is 2000; leave headroom for formatting.
const CHUNK_SIZE: usize = 1900;

/// Longest accepted mute (one year). Anything longer should be a ban.
const MAX_MUTE_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Mute {
        minutes: i64,
        subject_id: String,
        reason: String,
    },
    Unmute {
        subject_id: String,
    },
    Ban {
        subject_id: String,
        reason: String,
    },
    Unban {
        subject_id: String,
    },
    BlockStatus {
        subject_id: String,
    },
    ShowHistory {
        subject_id: String,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    Command(Command),
    /// A known command with bad arguments; reply with its usage line.
    Usage(&'static str),
    /// Not a command we know.
    Unknown,
}

/// Subject IDs are Discord snowflakes: 17 to 19 ASCII digits.
pub fn is_valid_subject_id(id: &str) -> bool {
    (17..=19).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_digit())
}

struct CommandDef {
    name: &'static str,
    usage: &'static str,
    /// `None` means the arguments did not validate; reply with `usage`.
    parse: fn(&[&str]) -> Option<Command>,
}

/// Adding a command is a row here plus a `Command` variant.
const COMMANDS: &[CommandDef] = &[
    CommandDef {
        name: "/mute",
        usage: "Usage: /mute <minutes> <userId> [reason]",
        parse: parse_mute,
    },
    CommandDef {
        name: "/unmute",
        usage: "Usage: /unmute <userId>",
        parse: |args| parse_subject_only(args, |subject_id| Command::Unmute { subject_id }),
    },
    CommandDef {
        name: "/ban",
        usage: "Usage: /ban <userId> [reason]",
        parse: parse_ban,
    },
    CommandDef {
        name: "/unban",
        usage: "Usage: /unban <userId>",
        parse: |args| parse_subject_only(args, |subject_id| Command::Unban { subject_id }),
    },
    CommandDef {
        name: "/blockstatus",
        usage: "Usage: /blockstatus <userId>",
        parse: |args| parse_subject_only(args, |subject_id| Command::BlockStatus { subject_id }),
    },
    CommandDef {
        name: "/showhistory",
        usage: "Usage: /showhistory <userId>",
        parse: |args| parse_subject_only(args, |subject_id| Command::ShowHistory { subject_id }),
    },
];

/// Parse a message starting with `/` into a moderation command.
pub fn parse(input: &str) -> ParseOutcome {
    let mut words = input.split_whitespace();
    let Some(name) = words.next() else {
        return ParseOutcome::Unknown;
    };
    let args: Vec<&str> = words.collect();

    match COMMANDS.iter().find(|entry| entry.name == name) {
        Some(entry) => match (entry.parse)(&args) {
            Some(command) => ParseOutcome::Command(command),
            None => ParseOutcome::Usage(entry.usage),
        },
        None => ParseOutcome::Unknown,
    }
}

fn parse_mute(args: &[&str]) -> Option<Command> {
    let minutes: i64 = args.first()?.parse().ok()?;
    let subject_id = args.get(1)?;
    if !(1..=MAX_MUTE_MINUTES).contains(&minutes) || !is_valid_subject_id(subject_id) {
        return None;
    }
    Some(Command::Mute {
        minutes,
        subject_id: subject_id.to_string(),
        reason: join_reason(&args[2..]),
    })
}

fn parse_ban(args: &[&str]) -> Option<Command> {
    let subject_id = args.first()?;
    if !is_valid_subject_id(subject_id) {
        return None;
    }
    Some(Command::Ban {
        subject_id: subject_id.to_string(),
        reason: join_reason(&args[1..]),
    })
}

fn parse_subject_only(args: &[&str], build: fn(String) -> Command) -> Option<Command> {
    match args.first() {
        Some(subject_id) if is_valid_subject_id(subject_id) => {
            Some(build(subject_id.to_string()))
        }
        _ => None,
    }
}

fn join_reason(words: &[&str]) -> String {
    if words.is_empty() {
        "No reason provided".to_string()
    } else {
        words.join(" ")
    }
}

/// Execute a parsed command, returning the reply split into Discord-sized
/// chunks.
pub async fn execute(
    command: Command,
    blocks: &BlockRegistry,
    history: &HistoryLog,
    moderator: &str,
) -> Result<Vec<String>, StoreError> {
    let reply = match command {
        Command::Mute {
            minutes,
            subject_id,
            reason,
        } => {
            blocks
                .set_block(
                    &subject_id,
                    BlockDuration::Minutes(minutes),
                    &reason,
                    moderator,
                )
                .await?;
            format!("Muted `{subject_id}` for {minutes} minute(s). Reason: {reason}")
        }
        Command::Unmute { subject_id } | Command::Unban { subject_id } => {
            blocks.clear_block(&subject_id).await?;
            format!("Removed any block for `{subject_id}`.")
        }
        Command::Ban { subject_id, reason } => {
            blocks
                .set_block(&subject_id, BlockDuration::Permanent, &reason, moderator)
                .await?;
            format!("Permanently banned `{subject_id}` from support. Reason: {reason}")
        }
        Command::BlockStatus { subject_id } => match blocks.check(&subject_id).await? {
            BlockStatus::NotBlocked => format!("`{subject_id}` is not blocked."),
            BlockStatus::Blocked {
                until,
                reason,
                permanent,
            } => {
                if permanent {
                    format!("`{subject_id}` is permanently banned. Reason: {reason}")
                } else {
                    let until = until.map(|u| u.to_rfc3339()).unwrap_or_default();
                    format!("`{subject_id}` is muted until {until}. Reason: {reason}")
                }
            }
        },
        Command::ShowHistory { subject_id } => {
            let entries = history.for_subject(&subject_id).await?;
            if entries.is_empty() {
                format!("No message history for `{subject_id}`.")
            } else {
                let mut lines = vec![format!("Message history for `{subject_id}`:")];
                for entry in entries {
                    let side = match entry.direction {
                        Direction::Visitor => "visitor",
                        Direction::Support => "support",
                    };
                    lines.push(format!(
                        "[{}] ({side}) {}: {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.author,
                        entry.content
                    ));
                }
                lines.join("\n")
            }
        }
    };
    Ok(chunk_message(&reply))
}

/// Split a reply at line boundaries so every chunk fits in one Discord
/// message. A single overlong line is split mid-line.
pub fn chunk_message(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_SIZE {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split('\n') {
        let mut line = line;
        while line.len() > CHUNK_SIZE {
            // Find a char boundary at or below the chunk size.
            let mut cut = CHUNK_SIZE;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(line[..cut].to_string());
            line = &line[cut..];
        }
        if !current.is_empty() && current.len() + line.len() + 1 > CHUNK_SIZE {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::kv::MemoryStore;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    const SUBJECT: &str = "123456789012345678";

    #[test]
    fn subject_id_validation() {
        assert!(is_valid_subject_id("12345678901234567")); // 17 digits
        assert!(is_valid_subject_id("1234567890123456789")); // 19 digits
        assert!(!is_valid_subject_id("1234567890123456")); // 16 digits
        assert!(!is_valid_subject_id("12345678901234567890")); // 20 digits
        assert!(!is_valid_subject_id("abc"));
        assert!(!is_valid_subject_id("12345678901234567a"));
        assert!(!is_valid_subject_id(""));
    }

    #[test]
    fn parse_mute_with_reason() {
        let outcome = parse(&format!("/mute 30 {SUBJECT} being rude"));
        assert_eq!(
            outcome,
            ParseOutcome::Command(Command::Mute {
                minutes: 30,
                subject_id: SUBJECT.to_string(),
                reason: "being rude".to_string(),
            })
        );
    }

    #[test]
    fn parse_mute_rejects_bad_arguments() {
        assert!(matches!(parse("/mute"), ParseOutcome::Usage(_)));
        assert!(matches!(parse("/mute abc 123"), ParseOutcome::Usage(_)));
        assert!(matches!(
            parse(&format!("/mute 0 {SUBJECT}")),
            ParseOutcome::Usage(_)
        ));
        assert!(matches!(parse("/mute 30 notanid"), ParseOutcome::Usage(_)));
    }

    #[test]
    fn mute_rejects_out_of_range_minutes() {
        assert!(matches!(
            parse(&format!("/mute -5 {SUBJECT}")),
            ParseOutcome::Usage(_)
        ));
        // A duration too large to ever expire must not reach the registry.
        assert!(matches!(
            parse(&format!("/mute 999999999999999999 {SUBJECT}")),
            ParseOutcome::Usage(_)
        ));
        assert!(matches!(
            parse(&format!("/mute {} {SUBJECT}", MAX_MUTE_MINUTES + 1)),
            ParseOutcome::Usage(_)
        ));
        assert!(matches!(
            parse(&format!("/mute {MAX_MUTE_MINUTES} {SUBJECT}")),
            ParseOutcome::Command(Command::Mute { .. })
        ));
    }

    #[test]
    fn parse_ban_defaults_the_reason() {
        let outcome = parse(&format!("/ban {SUBJECT}"));
        assert_eq!(
            outcome,
            ParseOutcome::Command(Command::Ban {
                subject_id: SUBJECT.to_string(),
                reason: "No reason provided".to_string(),
            })
        );
    }

    #[test]
    fn parse_subject_only_commands() {
        for (input, expected) in [
            (
                format!("/unmute {SUBJECT}"),
                Command::Unmute {
                    subject_id: SUBJECT.to_string(),
                },
            ),
            (
                format!("/unban {SUBJECT}"),
                Command::Unban {
                    subject_id: SUBJECT.to_string(),
                },
            ),
            (
                format!("/blockstatus {SUBJECT}"),
                Command::BlockStatus {
                    subject_id: SUBJECT.to_string(),
                },
            ),
            (
                format!("/showhistory {SUBJECT}"),
                Command::ShowHistory {
                    subject_id: SUBJECT.to_string(),
                },
            ),
        ] {
            assert_eq!(parse(&input), ParseOutcome::Command(expected));
        }
    }

    #[test]
    fn unknown_commands_are_reported() {
        assert_eq!(parse("/frobnicate 123"), ParseOutcome::Unknown);
        assert_eq!(parse("/"), ParseOutcome::Unknown);
    }

    #[tokio::test]
    async fn mute_places_a_timed_block() {
        let store = Arc::new(MemoryStore::new());
        let blocks = BlockRegistry::new(store.clone());
        let history = HistoryLog::new(store);

        let replies = execute(
            Command::Mute {
                minutes: 30,
                subject_id: SUBJECT.to_string(),
                reason: "spam".to_string(),
            },
            &blocks,
            &history,
            "mod#1",
        )
        .await
        .unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("30 minute"));

        match blocks.check(SUBJECT).await.unwrap() {
            crate::models::block::BlockStatus::Blocked {
                until, permanent, ..
            } => {
                assert!(!permanent);
                let remaining = until.unwrap() - Utc::now();
                assert!(remaining > Duration::minutes(29));
            }
            _ => panic!("expected blocked"),
        }
    }

    #[tokio::test]
    async fn ban_then_unban_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let blocks = BlockRegistry::new(store.clone());
        let history = HistoryLog::new(store);

        execute(
            Command::Ban {
                subject_id: SUBJECT.to_string(),
                reason: "evasion".to_string(),
            },
            &blocks,
            &history,
            "mod#1",
        )
        .await
        .unwrap();
        assert!(blocks.is_blocked(SUBJECT).await.unwrap());

        execute(
            Command::Unban {
                subject_id: SUBJECT.to_string(),
            },
            &blocks,
            &history,
            "mod#1",
        )
        .await
        .unwrap();
        assert!(!blocks.is_blocked(SUBJECT).await.unwrap());
    }

    #[tokio::test]
    async fn showhistory_lists_archived_messages() {
        let store = Arc::new(MemoryStore::new());
        let blocks = BlockRegistry::new(store.clone());
        let history = HistoryLog::new(store);

        history
            .append(SUBJECT, "user_a", "hello", Direction::Visitor)
            .await
            .unwrap();
        history
            .append(SUBJECT, "mod#1", "hi there", Direction::Support)
            .await
            .unwrap();

        let replies = execute(
            Command::ShowHistory {
                subject_id: SUBJECT.to_string(),
            },
            &blocks,
            &history,
            "mod#1",
        )
        .await
        .unwrap();
        let text = replies.join("\n");
        assert!(text.contains("hello"));
        assert!(text.contains("hi there"));
        assert!(text.contains("(visitor)"));
        assert!(text.contains("(support)"));
    }

    #[test]
    fn chunking_respects_the_size_cap() {
        let long: String = (0..200)
            .map(|i| format!("line number {i} with some padding text"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_message(&long);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= CHUNK_SIZE);
        }
        // Nothing lost: total content round-trips.
        assert_eq!(chunks.join("\n"), long);
    }

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(chunk_message("hello"), vec!["hello".to_string()]);
    }
}
