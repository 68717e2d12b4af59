//! Content parsing: event text -> an ordered sequence of typed segments.
//!
//! Pure and deterministic: the same input always yields the same sequence.
//! Priority order is `nostr:` user URIs, `nostr:` event URIs, hashtags,
//! image URLs, video URLs, other URLs; earlier starts win and overlapping
//! later matches are discarded. Consecutive media of the same kind
//! separated only by whitespace coalesce into one segment.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::event::{EventId, Kind, PublicKey};
use crate::nip19::{self, Nip19};

static NOSTR_URI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"nostr:[a-z0-9]+").expect("static regex"));
static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#[0-9A-Za-z_\x{80}-\x{10FFFF}]+").expect("static regex"));
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://[^\s]+\.(?:jpg|jpeg|png|gif|webp|svg)(?:\?[^\s]*)?")
        .expect("static regex")
});
static VIDEO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://[^\s]+\.(?:mp4|webm|mov)(?:\?[^\s]*)?").expect("static regex")
});
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s]+").expect("static regex"));

/// What a media URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// What an event reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTarget {
    /// `note1…` / `nevent1…`: a concrete event id.
    Id(EventId),
    /// `naddr1…`: an addressable-event coordinate.
    Address {
        kind: Kind,
        public_key: PublicKey,
        identifier: String,
    },
}

/// One typed span of an event's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// `nostr:npub1…` or `nostr:nprofile1…`
    Mention {
        uri: String,
        public_key: PublicKey,
        relays: Vec<String>,
    },
    /// `nostr:note1…`, `nostr:nevent1…` or `nostr:naddr1…`
    EventRef {
        uri: String,
        target: EventTarget,
        kind: Option<Kind>,
        author: Option<PublicKey>,
        relays: Vec<String>,
    },
    /// `#tag`, without the `#`.
    Hashtag(String),
    Link(String),
    /// One or more media URLs of the same kind, in input order.
    Media { urls: Vec<String>, kind: MediaKind },
}

/// Candidate priority classes, lowest wins on equal starts.
const PRIO_NOSTR_USER: u8 = 0;
const PRIO_NOSTR_EVENT: u8 = 1;
const PRIO_HASHTAG: u8 = 2;
const PRIO_IMAGE: u8 = 3;
const PRIO_VIDEO: u8 = 4;
const PRIO_URL: u8 = 5;

struct Candidate {
    start: usize,
    end: usize,
    priority: u8,
    segment: Segment,
}

/// Parse a content string into segments. Always covers the whole input:
/// everything unmatched is `Text`.
pub fn parse(content: &str) -> Vec<Segment> {
    let mut candidates = collect_candidates(content);
    candidates.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.priority.cmp(&b.priority))
            .then(b.end.cmp(&a.end))
    });

    let mut segments = Vec::new();
    let mut cursor = 0usize;
    for candidate in candidates {
        if candidate.start < cursor {
            continue; // overlaps an earlier winner
        }
        if candidate.start > cursor {
            segments.push(Segment::Text(content[cursor..candidate.start].to_string()));
        }
        cursor = candidate.end;
        segments.push(candidate.segment);
    }
    if cursor < content.len() {
        segments.push(Segment::Text(content[cursor..].to_string()));
    }

    coalesce_media(segments)
}

fn collect_candidates(content: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for found in NOSTR_URI_RE.find_iter(content) {
        let uri = found.as_str();
        let bech32_part = &uri["nostr:".len()..];
        // Unparseable URIs degrade to plain text by not becoming candidates.
        let Ok(entity) = nip19::decode(bech32_part) else {
            continue;
        };
        let (priority, segment) = match entity {
            Nip19::Pubkey(public_key) => (
                PRIO_NOSTR_USER,
                Segment::Mention {
                    uri: uri.to_string(),
                    public_key,
                    relays: Vec::new(),
                },
            ),
            Nip19::Profile(profile) => (
                PRIO_NOSTR_USER,
                Segment::Mention {
                    uri: uri.to_string(),
                    public_key: profile.public_key,
                    relays: profile.relays,
                },
            ),
            Nip19::EventId(event_id) => (
                PRIO_NOSTR_EVENT,
                Segment::EventRef {
                    uri: uri.to_string(),
                    target: EventTarget::Id(event_id),
                    kind: None,
                    author: None,
                    relays: Vec::new(),
                },
            ),
            Nip19::Event(event_ref) => (
                PRIO_NOSTR_EVENT,
                Segment::EventRef {
                    uri: uri.to_string(),
                    target: EventTarget::Id(event_ref.event_id),
                    kind: event_ref.kind,
                    author: event_ref.author,
                    relays: event_ref.relays,
                },
            ),
            Nip19::Coordinate(coordinate) => (
                PRIO_NOSTR_EVENT,
                Segment::EventRef {
                    uri: uri.to_string(),
                    kind: Some(coordinate.kind),
                    author: Some(coordinate.public_key),
                    relays: coordinate.relays.clone(),
                    target: EventTarget::Address {
                        kind: coordinate.kind,
                        public_key: coordinate.public_key,
                        identifier: coordinate.identifier,
                    },
                },
            ),
        };
        candidates.push(Candidate {
            start: found.start(),
            end: found.end(),
            priority,
            segment,
        });
    }

    for found in HASHTAG_RE.find_iter(content) {
        // Hashtags only count after start-of-input or whitespace; the
        // whitespace itself stays in the surrounding text.
        let preceded_ok = content[..found.start()]
            .chars()
            .next_back()
            .is_none_or(char::is_whitespace);
        if !preceded_ok {
            continue;
        }
        candidates.push(Candidate {
            start: found.start(),
            end: found.end(),
            priority: PRIO_HASHTAG,
            segment: Segment::Hashtag(found.as_str()[1..].to_string()),
        });
    }

    for found in IMAGE_RE.find_iter(content) {
        candidates.push(Candidate {
            start: found.start(),
            end: found.end(),
            priority: PRIO_IMAGE,
            segment: Segment::Media {
                urls: vec![found.as_str().to_string()],
                kind: MediaKind::Image,
            },
        });
    }

    for found in VIDEO_RE.find_iter(content) {
        candidates.push(Candidate {
            start: found.start(),
            end: found.end(),
            priority: PRIO_VIDEO,
            segment: Segment::Media {
                urls: vec![found.as_str().to_string()],
                kind: MediaKind::Video,
            },
        });
    }

    for found in URL_RE.find_iter(content) {
        let trimmed = found.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']']);
        if trimmed.len() <= "https://".len() {
            continue;
        }
        candidates.push(Candidate {
            start: found.start(),
            end: found.start() + trimmed.len(),
            priority: PRIO_URL,
            segment: Segment::Link(trimmed.to_string()),
        });
    }

    candidates
}

/// Merge runs of same-kind media separated only by whitespace; the
/// whitespace between merged media is dropped. Any other segment flushes
/// the run.
fn coalesce_media(segments: Vec<Segment>) -> Vec<Segment> {
    let mut result: Vec<Segment> = Vec::new();
    let mut pending_whitespace: Option<String> = None;

    for segment in segments {
        match segment {
            Segment::Media { urls, kind } => {
                let merged = match result.last_mut() {
                    Some(Segment::Media {
                        urls: previous_urls,
                        kind: previous_kind,
                    }) if *previous_kind == kind => {
                        previous_urls.extend(urls.clone());
                        pending_whitespace = None;
                        true
                    }
                    _ => false,
                };
                if !merged {
                    if let Some(whitespace) = pending_whitespace.take() {
                        result.push(Segment::Text(whitespace));
                    }
                    result.push(Segment::Media { urls, kind });
                }
            }
            Segment::Text(text)
                if !text.is_empty()
                    && text.chars().all(char::is_whitespace)
                    && matches!(result.last(), Some(Segment::Media { .. })) =>
            {
                // Might separate two media of the same kind; held until we
                // see what follows.
                pending_whitespace = Some(text);
            }
            other => {
                if let Some(whitespace) = pending_whitespace.take() {
                    result.push(Segment::Text(whitespace));
                }
                result.push(other);
            }
        }
    }
    if let Some(whitespace) = pending_whitespace {
        result.push(Segment::Text(whitespace));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nip19::ToBech32;

    #[test]
    fn test_parse_plain_text() {
        assert_eq!(
            parse("Hello, world!"),
            vec![Segment::Text("Hello, world!".to_string())]
        );
        assert_eq!(parse(""), Vec::<Segment>::new());
    }

    #[test]
    fn test_parse_hashtag_keeps_leading_whitespace_as_text() {
        let segments = parse("hi #nostr");
        assert_eq!(
            segments,
            vec![
                Segment::Text("hi ".to_string()),
                Segment::Hashtag("nostr".to_string()),
            ]
        );
    }

    #[test]
    fn test_hashtag_mid_word_is_not_a_hashtag() {
        assert_eq!(
            parse("ab#cd"),
            vec![Segment::Text("ab#cd".to_string())]
        );
    }

    #[test]
    fn test_unicode_hashtag() {
        let segments = parse("#日本語 ok");
        assert_eq!(
            segments,
            vec![
                Segment::Hashtag("日本語".to_string()),
                Segment::Text(" ok".to_string()),
            ]
        );
    }

    #[test]
    fn test_mention_from_npub() {
        let public_key = PublicKey::from_hex(
            "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e",
        )
        .unwrap();
        let uri = format!("nostr:{}", public_key.to_bech32().unwrap());
        let segments = parse(&format!("cc {}", uri));
        assert_eq!(
            segments,
            vec![
                Segment::Text("cc ".to_string()),
                Segment::Mention {
                    uri,
                    public_key,
                    relays: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_event_ref_from_nevent_carries_hints() {
        let reference = nip19::Nip19Event {
            event_id: EventId::from_bytes([5u8; 32]),
            author: Some(PublicKey::from_bytes([7u8; 32])),
            kind: Some(Kind(1)),
            relays: vec!["wss://relay.example.com".to_string()],
        };
        let uri = format!("nostr:{}", reference.to_bech32().unwrap());
        let segments = parse(&uri);
        match &segments[0] {
            Segment::EventRef {
                target,
                kind,
                author,
                relays,
                ..
            } => {
                assert_eq!(*target, EventTarget::Id(reference.event_id));
                assert_eq!(*kind, Some(Kind(1)));
                assert_eq!(*author, reference.author);
                assert_eq!(relays, &reference.relays);
            }
            other => panic!("unexpected segment: {:?}", other),
        }
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_unparseable_nostr_uri_degrades_to_text() {
        let segments = parse("see nostr:thisisnotbech32data ok");
        assert_eq!(
            segments,
            vec![Segment::Text("see nostr:thisisnotbech32data ok".to_string())]
        );
    }

    #[test]
    fn test_image_beats_generic_url() {
        let segments = parse("https://a.example/pic.png");
        assert_eq!(
            segments,
            vec![Segment::Media {
                urls: vec!["https://a.example/pic.png".to_string()],
                kind: MediaKind::Image,
            }]
        );
    }

    #[test]
    fn test_video_with_query_string() {
        let segments = parse("https://v.example/clip.mp4?t=10");
        assert_eq!(
            segments,
            vec![Segment::Media {
                urls: vec!["https://v.example/clip.mp4?t=10".to_string()],
                kind: MediaKind::Video,
            }]
        );
    }

    #[test]
    fn test_media_grouping_scenario() {
        // S5 from the acceptance scenarios.
        let segments = parse(
            "hi #nostr check https://a.example/img.png https://a.example/img2.png and https://b.example",
        );
        assert_eq!(
            segments,
            vec![
                Segment::Text("hi ".to_string()),
                Segment::Hashtag("nostr".to_string()),
                Segment::Text(" check ".to_string()),
                Segment::Media {
                    urls: vec![
                        "https://a.example/img.png".to_string(),
                        "https://a.example/img2.png".to_string(),
                    ],
                    kind: MediaKind::Image,
                },
                Segment::Text(" and ".to_string()),
                Segment::Link("https://b.example".to_string()),
            ]
        );
    }

    #[test]
    fn test_mixed_media_kinds_do_not_merge() {
        let segments = parse("https://a.example/a.png https://a.example/b.mp4");
        assert_eq!(
            segments,
            vec![
                Segment::Media {
                    urls: vec!["https://a.example/a.png".to_string()],
                    kind: MediaKind::Image,
                },
                Segment::Text(" ".to_string()),
                Segment::Media {
                    urls: vec!["https://a.example/b.mp4".to_string()],
                    kind: MediaKind::Video,
                },
            ]
        );
    }

    #[test]
    fn test_non_whitespace_flushes_media_group() {
        let segments = parse("https://a.example/a.png and https://a.example/b.png");
        assert_eq!(
            segments,
            vec![
                Segment::Media {
                    urls: vec!["https://a.example/a.png".to_string()],
                    kind: MediaKind::Image,
                },
                Segment::Text(" and ".to_string()),
                Segment::Media {
                    urls: vec!["https://a.example/b.png".to_string()],
                    kind: MediaKind::Image,
                },
            ]
        );
    }

    #[test]
    fn test_trailing_punctuation_stays_text() {
        let segments = parse("see https://b.example.");
        assert_eq!(
            segments,
            vec![
                Segment::Text("see ".to_string()),
                Segment::Link("https://b.example".to_string()),
                Segment::Text(".".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_is_deterministic_and_covers_input() {
        let input = "a #b nostr:nope https://c.example/d.png e";
        let first = parse(input);
        let second = parse(input);
        assert_eq!(first, second);

        // Reassembly: the segment sequence covers the input exactly.
        let rebuilt: String = first
            .iter()
            .map(|segment| match segment {
                Segment::Text(t) => t.clone(),
                Segment::Hashtag(h) => format!("#{}", h),
                Segment::Link(u) => u.clone(),
                Segment::Media { urls, .. } => urls.join(" "),
                Segment::Mention { uri, .. } | Segment::EventRef { uri, .. } => uri.clone(),
            })
            .collect();
        assert_eq!(rebuilt, input);
    }
}
