//! Candidate selection: ordering, author filtering and classification.

use std::collections::HashSet;

use voice_inbox_core::{Attachment, Message, MessageId};

/// Synthetic attachment URL marking a text-only item.
pub const TEXT_ATTACHMENT_URL: &str = "about:text";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CandidateKind {
    Audio,
    Text,
}

impl CandidateKind {
    /// Recover the kind of a stored item from its attachment.
    pub fn of(attachment_url: &str) -> Self {
        if attachment_url == TEXT_ATTACHMENT_URL {
            CandidateKind::Text
        } else {
            CandidateKind::Audio
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::Audio => "audio",
            CandidateKind::Text => "text",
        }
    }
}

/// A fetched message selected for processing in this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub message: Message,
    pub attachment: Attachment,
    pub kind: CandidateKind,
    /// Empty until a guild id is known.
    pub jump_url: Option<String>,
}

/// Pseudo-attachment standing in for the body of a text-only message.
pub fn text_attachment(message_id: &MessageId) -> Attachment {
    Attachment {
        id: format!("text-{message_id}"),
        url: TEXT_ATTACHMENT_URL.to_string(),
        filename: "message.txt".to_string(),
        content_type: "text/plain".to_string(),
    }
}

pub fn jump_url(guild_id: &str, channel_id: &str, message_id: &MessageId) -> String {
    format!("https://discord.com/channels/{guild_id}/{channel_id}/{message_id}")
}

/// Ordered (oldest first) candidates from a fetched batch.
///
/// Items by authors outside `allowed` are dropped. An item with an audio
/// attachment is audio (first such attachment wins, text is ignored); an item
/// with only non-blank text is text; anything else is dropped.
pub fn select_candidates(messages: &[Message], allowed: &HashSet<String>) -> Vec<Candidate> {
    let mut sorted: Vec<&Message> = messages.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    sorted
        .into_iter()
        .filter(|msg| allowed.contains(&msg.author.id))
        .filter_map(|msg| {
            let (attachment, kind) = match msg.attachments.iter().find(|a| a.is_audio()) {
                Some(audio) => (audio.clone(), CandidateKind::Audio),
                None if !msg.content.trim().is_empty() => {
                    (text_attachment(&msg.id), CandidateKind::Text)
                }
                None => return None,
            };
            Some(Candidate {
                jump_url: msg
                    .guild()
                    .map(|guild| jump_url(guild, &msg.channel_id, &msg.id)),
                message: msg.clone(),
                attachment,
                kind,
            })
        })
        .collect()
}

/// Highest id in the batch, filtered items included.
pub fn max_message_id(messages: &[Message]) -> Option<MessageId> {
    messages.iter().map(|m| &m.id).max().cloned()
}

/// Guild id of the first fetched item that carries one.
pub fn first_guild(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .find_map(|m| m.guild())
        .map(str::to_string)
}

/// Fill missing jump links from a fallback guild id.
pub fn apply_fallback_guild(candidates: &mut [Candidate], guild_id: &str) {
    for candidate in candidates.iter_mut().filter(|c| c.jump_url.is_none()) {
        candidate.jump_url = Some(jump_url(
            guild_id,
            &candidate.message.channel_id,
            &candidate.message.id,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use voice_inbox_core::Author;

    fn msg(id: &str, author: &str, content: &str, attachments: Vec<Attachment>) -> Message {
        Message {
            id: MessageId::new(id),
            channel_id: "chan".to_string(),
            guild_id: None,
            content: content.to_string(),
            author: Author {
                id: author.to_string(),
                username: String::new(),
            },
            attachments,
        }
    }

    fn audio(id: &str) -> Attachment {
        Attachment {
            id: id.to_string(),
            url: format!("https://cdn.example/{id}.ogg"),
            filename: format!("{id}.ogg"),
            content_type: "audio/ogg".to_string(),
        }
    }

    fn image(id: &str) -> Attachment {
        Attachment {
            id: id.to_string(),
            url: format!("https://cdn.example/{id}.png"),
            filename: format!("{id}.png"),
            content_type: "image/png".to_string(),
        }
    }

    fn allowed() -> HashSet<String> {
        HashSet::from(["me".to_string()])
    }

    #[test]
    fn candidates_are_ordered_by_id() {
        let messages = vec![
            msg("300", "me", "", vec![audio("c")]),
            msg("100", "me", "", vec![audio("a")]),
            msg("200", "me", "", vec![audio("b")]),
        ];
        let ids: Vec<String> = select_candidates(&messages, &allowed())
            .into_iter()
            .map(|c| c.message.id.into_inner())
            .collect();
        assert_eq!(ids, vec!["100", "200", "300"]);
    }

    #[test]
    fn disallowed_author_is_never_selected() {
        let messages = vec![msg("100", "stranger", "hello", vec![audio("a")])];
        assert!(select_candidates(&messages, &allowed()).is_empty());
    }

    #[test]
    fn classification_prefers_audio_then_text() {
        let messages = vec![
            msg("1", "me", "caption", vec![image("i"), audio("a1"), audio("a2")]),
            msg("2", "me", "  just words ", vec![image("i")]),
            msg("3", "me", "   ", vec![image("i")]),
            msg("4", "me", "", vec![]),
        ];
        let candidates = select_candidates(&messages, &allowed());
        assert_eq!(candidates.len(), 2);

        assert_eq!(candidates[0].kind, CandidateKind::Audio);
        assert_eq!(candidates[0].attachment.id, "a1");

        assert_eq!(candidates[1].kind, CandidateKind::Text);
        assert_eq!(candidates[1].attachment, text_attachment(&MessageId::new("2")));
        assert_eq!(CandidateKind::of(&candidates[1].attachment.url), CandidateKind::Text);
    }

    #[test]
    fn max_id_covers_filtered_items() {
        let messages = vec![
            msg("100", "me", "", vec![audio("a")]),
            msg("1000", "stranger", "", vec![audio("b")]),
        ];
        assert_eq!(select_candidates(&messages, &allowed()).len(), 1);
        assert_eq!(max_message_id(&messages), Some(MessageId::new("1000")));
        assert_eq!(max_message_id(&[]), None);
    }

    #[test]
    fn jump_links_use_own_guild_then_fallback() {
        let mut with_guild = msg("1", "me", "", vec![audio("a")]);
        with_guild.guild_id = Some("g1".to_string());
        let without = msg("2", "me", "", vec![audio("b")]);

        let messages = vec![without, with_guild];
        let mut candidates = select_candidates(&messages, &allowed());
        assert_eq!(
            candidates[0].jump_url.as_deref(),
            Some("https://discord.com/channels/g1/chan/1")
        );
        assert!(candidates[1].jump_url.is_none());

        let fallback = first_guild(&messages).unwrap();
        apply_fallback_guild(&mut candidates, &fallback);
        assert_eq!(
            candidates[1].jump_url.as_deref(),
            Some("https://discord.com/channels/g1/chan/2")
        );
    }

    proptest! {
        #[test]
        fn selection_is_independent_of_input_order(ids in proptest::collection::hash_set(1u64..1_000_000, 1..20)) {
            let messages: Vec<Message> = ids
                .iter()
                .map(|id| msg(&id.to_string(), "me", "", vec![audio("a")]))
                .collect();
            let mut reversed = messages.clone();
            reversed.reverse();

            let forward = select_candidates(&messages, &allowed());
            let backward = select_candidates(&reversed, &allowed());
            prop_assert_eq!(&forward, &backward);

            let mut expected: Vec<u64> = ids.into_iter().collect();
            expected.sort_unstable();
            let got: Vec<u64> = forward.iter().map(|c| c.message.id.as_str().parse().unwrap()).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
