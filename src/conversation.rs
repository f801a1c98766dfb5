//! Per-session message list owning the in-flight turn

use crate::message::{BlockContent, BlockKind, BlockStatus, Message, MessageBlock};
use crate::reducer::{TurnState, TurnStep};
use crate::types::{EventKind, StreamEvent};
use serde_json::{Map, Value};

/// Messages of one session plus the reducer state of its current turn
#[derive(Debug, Clone)]
pub struct Conversation {
    session_id: String,
    messages: Vec<Message>,
    turn: Option<TurnState>,

    /// Rebuild the in-flight turn from scratch on the next event
    rewind_pending: bool,

    /// A backend replay has started rebuilding the turn since the last rewind
    replaying: bool,

    /// Prompts of the in-flight turn the user already answered, re-applied
    /// whenever the turn is rebuilt
    answered: Vec<MessageBlock>,

    /// Persisted messages have been loaded from the session API
    history_loaded: bool,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            history_loaded: false,
            ..Self::with_history(session_id, Vec::new())
        }
    }

    /// Start from previously persisted messages
    pub fn with_history(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            session_id: session_id.into(),
            messages,
            turn: None,
            rewind_pending: false,
            replaying: false,
            answered: Vec::new(),
            history_loaded: true,
        }
    }

    /// Append the user's message and an empty assistant shell
    ///
    /// Returns the assistant message id the turn's events will fill.
    pub fn begin_turn(&mut self, content: &str) -> String {
        self.messages.push(Message::user(content));
        self.rewind_pending = false;
        self.replaying = false;
        let id = self.open_turn();
        tracing::debug!(session_id = %self.session_id, message_id = %id, "Turn started");
        id
    }

    /// Apply one routed event
    ///
    /// With no turn in flight the event opens an implicit one, so replayed
    /// or foreign turns are still reconstructed. A finished turn only gives
    /// way to a new one on `start`.
    pub fn handle_event(&mut self, event: &StreamEvent) -> TurnStep {
        if std::mem::take(&mut self.rewind_pending) {
            self.reset_in_flight();
            self.replaying = true;
        }

        let needs_turn = match &self.turn {
            None => true,
            Some(turn) => turn.is_finished() && event.kind == EventKind::Start,
        };
        if needs_turn {
            let id = self.open_turn();
            tracing::debug!(
                session_id = %self.session_id,
                message_id = %id,
                kind = %event.kind,
                "Opened turn for incoming events"
            );
        }

        let Some(turn) = self.turn.as_mut() else {
            return TurnStep::Ignored;
        };
        let message_id = turn.message_id();
        let Some(message) = self.messages.iter_mut().rev().find(|m| m.id == message_id) else {
            tracing::warn!(session_id = %self.session_id, "In-flight message missing");
            return TurnStep::Ignored;
        };
        let step = turn.apply(message, event);
        carry_answers(&self.answered, message);
        step
    }

    /// Mark the in-flight turn to be rebuilt from the next event
    ///
    /// Used after re-subscribing: the backend replays the turn from its
    /// beginning.
    pub fn rewind(&mut self) {
        self.rewind_pending = true;
        self.replaying = false;
    }

    /// Rebuild the in-flight turn from a snapshot of its events
    ///
    /// Reuses the unfinished turn's message when there is one, otherwise
    /// appends a single recovered message. Returns its id.
    ///
    /// Once a replay has started after `rewind`, the replay owns the turn
    /// and the snapshot is not applied.
    pub fn restore(&mut self, events: &[StreamEvent]) -> Option<String> {
        if events.is_empty() {
            return None;
        }
        if self.replaying {
            tracing::debug!(session_id = %self.session_id, "Replay in progress, snapshot skipped");
            return self.in_flight_id().map(str::to_string);
        }
        let id = match self.in_flight_id() {
            Some(id) => id.to_string(),
            None => self.open_turn(),
        };
        self.remember_answers(&id);

        let mut message = Message::assistant_shell(&id);
        let mut turn = TurnState::new(&id);
        for event in events {
            turn.apply(&mut message, event);
            carry_answers(&self.answered, &mut message);
        }
        if let Some(slot) = self.messages.iter_mut().rev().find(|m| m.id == id) {
            message.timestamp = slot.timestamp;
            *slot = message;
        }
        self.turn = Some(turn);

        tracing::info!(
            session_id = %self.session_id,
            message_id = %id,
            events = events.len(),
            "Restored in-flight turn"
        );
        Some(id)
    }

    /// Record answers to an `ask_user` block; an empty map means skipped
    pub fn resolve_question(&mut self, request_id: &str, answers: Map<String, Value>) -> bool {
        let block = self
            .messages
            .iter_mut()
            .rev()
            .flat_map(|m| m.blocks.iter_mut())
            .find(|b| {
                b.kind() == BlockKind::AskUser
                    && b.metadata.request_id.as_deref() == Some(request_id)
            });
        let Some(block) = block else {
            return false;
        };
        if let BlockContent::AskUser(questionnaire) = &mut block.content {
            questionnaire.answers = Some(answers);
        }
        block.advance(BlockStatus::Success)
    }

    /// Record a permission decision; a denial settles the block as error
    pub fn resolve_permission(&mut self, request_id: &str, approved: bool) -> bool {
        let block = self
            .messages
            .iter_mut()
            .rev()
            .flat_map(|m| m.blocks.iter_mut())
            .find(|b| {
                b.metadata.requires_permission
                    && b.metadata.request_id.as_deref() == Some(request_id)
            });
        let Some(block) = block else {
            return false;
        };
        block.metadata.approved = Some(approved);
        block.advance(if approved {
            BlockStatus::Success
        } else {
            BlockStatus::Error
        })
    }

    /// Replace all messages (history reload) and drop the in-flight turn
    pub fn replace_history(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.turn = None;
        self.rewind_pending = false;
        self.replaying = false;
        self.answered.clear();
        self.history_loaded = true;
    }

    /// Install persisted messages beneath the in-flight turn
    ///
    /// Without a turn in flight this is `replace_history`. Otherwise the
    /// in-flight message and anything after it stay on top of the loaded
    /// history, and the turn keeps streaming into it.
    pub fn load_history(&mut self, history: Vec<Message>) {
        let Some(id) = self.in_flight_id().map(str::to_string) else {
            self.replace_history(history);
            return;
        };
        let start = self
            .messages
            .iter()
            .rposition(|m| m.id == id)
            .unwrap_or(self.messages.len());
        let live = self.messages.split_off(start);
        self.messages = history.into_iter().filter(|m| m.id != id).collect();
        self.messages.extend(live);
        self.history_loaded = true;
        tracing::debug!(
            session_id = %self.session_id,
            message_id = %id,
            messages = self.messages.len(),
            "Loaded history beneath in-flight turn"
        );
    }

    /// Persisted messages have been loaded at least once
    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Assistant message id of the unfinished turn, if any
    pub fn in_flight_id(&self) -> Option<&str> {
        self.turn
            .as_ref()
            .filter(|t| !t.is_finished())
            .map(TurnState::message_id)
    }

    pub fn is_turn_active(&self) -> bool {
        self.in_flight_id().is_some()
    }

    fn open_turn(&mut self) -> String {
        self.answered.clear();
        let id = format!("msg-{}", uuid::Uuid::new_v4());
        self.messages.push(Message::assistant_shell(&id));
        self.turn = Some(TurnState::new(&id));
        id
    }

    fn reset_in_flight(&mut self) {
        let Some(id) = self.in_flight_id().map(str::to_string) else {
            return;
        };
        self.remember_answers(&id);
        if let Some(slot) = self.messages.iter_mut().rev().find(|m| m.id == id) {
            let timestamp = slot.timestamp;
            *slot = Message::assistant_shell(&id);
            slot.timestamp = timestamp;
        }
        self.turn = Some(TurnState::new(&id));
        tracing::debug!(session_id = %self.session_id, message_id = %id, "Rewound in-flight turn");
    }

    /// Save the settled prompts of message `id` before it is rebuilt
    fn remember_answers(&mut self, id: &str) {
        let Some(message) = self.messages.iter().rev().find(|m| m.id == id) else {
            return;
        };
        for block in message.blocks.iter().filter(|b| is_answered_prompt(b)) {
            match self.answered.iter_mut().find(|a| a.id == block.id) {
                Some(saved) => *saved = block.clone(),
                None => self.answered.push(block.clone()),
            }
        }
    }
}

fn is_answered_prompt(block: &MessageBlock) -> bool {
    block.metadata.request_id.is_some()
        && block.status.is_settled()
        && (block.kind() == BlockKind::AskUser || block.metadata.requires_permission)
}

/// Re-apply saved answers to prompts a rebuild brought back as pending
fn carry_answers(answered: &[MessageBlock], message: &mut Message) {
    for saved in answered {
        let Some(block) = message.block_mut(&saved.id) else {
            continue;
        };
        if block.status.is_settled() {
            continue;
        }
        if let (BlockContent::AskUser(questionnaire), BlockContent::AskUser(previous)) =
            (&mut block.content, &saved.content)
        {
            questionnaire.answers = previous.answers.clone();
        }
        block.metadata.approved = saved.metadata.approved;
        block.advance(saved.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use serde_json::json;

    fn ev(kind: EventKind, content: Value) -> StreamEvent {
        StreamEvent::new(kind, "s-1", content)
    }

    fn text_turn(text: &str) -> Vec<StreamEvent> {
        vec![
            ev(EventKind::Start, json!(null)),
            ev(EventKind::TextStart, json!(null)),
            ev(EventKind::TextDelta, json!(text)),
        ]
    }

    #[test]
    fn test_begin_turn_shows_placeholder() {
        let mut conv = Conversation::new("s-1");
        let id = conv.begin_turn("hello");
        assert_eq!(conv.messages().len(), 2);
        assert_eq!(conv.messages()[0].role, Role::User);
        let assistant = conv.last_message().unwrap();
        assert_eq!(assistant.id, id);
        assert!(assistant.has_placeholder());
        assert_eq!(conv.in_flight_id(), Some(id.as_str()));
    }

    #[test]
    fn test_events_without_turn_open_one() {
        let mut conv = Conversation::new("s-1");
        for e in text_turn("Hi") {
            conv.handle_event(&e);
        }
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.last_message().unwrap().content, "Hi");
    }

    #[test]
    fn test_finished_turn_ignores_stragglers_but_accepts_new_start() {
        let mut conv = Conversation::new("s-1");
        conv.begin_turn("one");
        conv.handle_event(&ev(EventKind::Done, json!(null)));
        assert_eq!(
            conv.handle_event(&ev(EventKind::TextDelta, json!("late"))),
            TurnStep::Ignored
        );
        assert_eq!(conv.messages().len(), 2);

        conv.handle_event(&ev(EventKind::Start, json!(null)));
        assert_eq!(conv.messages().len(), 3);
        assert!(conv.is_turn_active());
    }

    #[test]
    fn test_rewind_then_replay_does_not_duplicate() {
        let mut conv = Conversation::new("s-1");
        let id = conv.begin_turn("hello");
        for e in text_turn("Hi") {
            conv.handle_event(&e);
        }
        conv.rewind();
        for e in text_turn("Hi") {
            conv.handle_event(&e);
        }
        let msg = conv.last_message().unwrap();
        assert_eq!(msg.id, id);
        assert_eq!(msg.blocks.len(), 1);
        assert_eq!(msg.content, "Hi");
    }

    #[test]
    fn test_restore_twice_is_idempotent() {
        let mut conv = Conversation::new("s-1");
        let events = text_turn("partial");
        let first = conv.restore(&events).unwrap();
        let snapshot = serde_json::to_string(&conv.last_message().unwrap().blocks).unwrap();
        let second = conv.restore(&events).unwrap();
        assert_eq!(first, second);
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(
            serde_json::to_string(&conv.last_message().unwrap().blocks).unwrap(),
            snapshot
        );
    }

    #[test]
    fn test_restore_and_replay_converge_in_either_order() {
        let events = text_turn("abc");

        let mut a = Conversation::new("s-1");
        a.rewind();
        a.restore(&events);
        for e in &events {
            a.handle_event(e);
        }

        let mut b = Conversation::new("s-1");
        b.rewind();
        for e in &events {
            b.handle_event(e);
        }
        b.restore(&events);

        for conv in [&a, &b] {
            assert_eq!(conv.messages().len(), 1);
            assert_eq!(conv.last_message().unwrap().content, "abc");
            assert_eq!(conv.last_message().unwrap().blocks.len(), 1);
        }
    }

    #[test]
    fn test_restore_during_replay_keeps_replay() {
        let events = text_turn("abc");
        let mut conv = Conversation::new("s-1");
        conv.rewind();
        conv.handle_event(&events[0]);
        conv.handle_event(&events[1]);

        let id = conv.restore(&events).unwrap();
        conv.handle_event(&events[2]);

        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.last_message().unwrap().id, id);
        assert_eq!(conv.last_message().unwrap().content, "abc");
    }

    #[test]
    fn test_resolve_question() {
        let mut conv = Conversation::new("s-1");
        conv.begin_turn("q");
        conv.handle_event(&ev(
            EventKind::AskUser,
            json!({"request_id": "r1", "questions": [{"question": "A or B?"}]}),
        ));
        let mut answers = Map::new();
        answers.insert("A or B?".into(), json!("A"));
        assert!(conv.resolve_question("r1", answers));
        let block = conv.last_message().unwrap().block("ask-r1").unwrap();
        assert_eq!(block.status, BlockStatus::Success);
        assert!(!conv.resolve_question("missing", Map::new()));
    }

    #[test]
    fn test_resolve_permission_denied() {
        let mut conv = Conversation::new("s-1");
        conv.begin_turn("q");
        conv.handle_event(&ev(
            EventKind::PermissionRequest,
            json!({"request_id": "p1", "tool_name": "Bash", "input": {}}),
        ));
        assert!(conv.resolve_permission("p1", false));
        let block = conv.last_message().unwrap().block("permission-p1").unwrap();
        assert_eq!(block.status, BlockStatus::Error);
        assert_eq!(block.metadata.approved, Some(false));
    }

    fn prompt_turn() -> Vec<StreamEvent> {
        vec![
            ev(EventKind::Start, json!(null)),
            ev(
                EventKind::AskUser,
                json!({"request_id": "r1", "questions": [{"question": "A or B?"}]}),
            ),
            ev(
                EventKind::PermissionRequest,
                json!({"request_id": "p1", "tool_name": "Bash", "input": {}}),
            ),
        ]
    }

    fn answer_prompts(conv: &mut Conversation) {
        let mut answers = Map::new();
        answers.insert("A or B?".into(), json!("B"));
        assert!(conv.resolve_question("r1", answers));
        assert!(conv.resolve_permission("p1", false));
    }

    fn assert_prompts_answered(conv: &Conversation) {
        let message = conv.last_message().unwrap();
        let ask = message.block("ask-r1").unwrap();
        assert_eq!(ask.status, BlockStatus::Success);
        match &ask.content {
            BlockContent::AskUser(q) => {
                assert_eq!(q.answers.as_ref().unwrap()["A or B?"], json!("B"))
            }
            other => panic!("unexpected content {:?}", other),
        }
        let permission = message.block("permission-p1").unwrap();
        assert_eq!(permission.status, BlockStatus::Error);
        assert_eq!(permission.metadata.approved, Some(false));
    }

    #[test]
    fn test_replay_keeps_answered_prompts() {
        let mut conv = Conversation::new("s-1");
        conv.begin_turn("q");
        for e in prompt_turn() {
            conv.handle_event(&e);
        }
        answer_prompts(&mut conv);

        conv.rewind();
        for e in prompt_turn() {
            conv.handle_event(&e);
        }
        assert_prompts_answered(&conv);

        // A second reconnect still remembers the answers.
        conv.rewind();
        for e in prompt_turn() {
            conv.handle_event(&e);
        }
        assert_prompts_answered(&conv);
    }

    #[test]
    fn test_restore_keeps_answered_prompts() {
        let mut conv = Conversation::new("s-1");
        conv.begin_turn("q");
        for e in prompt_turn() {
            conv.handle_event(&e);
        }
        answer_prompts(&mut conv);

        conv.restore(&prompt_turn()).unwrap();
        assert_prompts_answered(&conv);
        assert_eq!(conv.messages().len(), 2);
    }

    #[test]
    fn test_new_turn_forgets_previous_answers() {
        let mut conv = Conversation::new("s-1");
        conv.begin_turn("q");
        for e in prompt_turn() {
            conv.handle_event(&e);
        }
        answer_prompts(&mut conv);
        conv.handle_event(&ev(EventKind::Done, json!(null)));

        conv.begin_turn("again");
        for e in prompt_turn() {
            conv.handle_event(&e);
        }
        let message = conv.last_message().unwrap();
        assert_eq!(message.block("ask-r1").unwrap().status, BlockStatus::Pending);
    }

    #[test]
    fn test_load_history_keeps_in_flight_turn_on_top() {
        let mut conv = Conversation::new("s-1");
        assert!(!conv.history_loaded());
        for e in text_turn("live") {
            conv.handle_event(&e);
        }
        let id = conv.in_flight_id().unwrap().to_string();

        conv.load_history(vec![Message::user("old"), Message::user("prompt")]);
        assert!(conv.history_loaded());
        assert_eq!(conv.messages().len(), 3);
        assert_eq!(conv.messages()[0].content, "old");
        assert_eq!(conv.last_message().unwrap().id, id);

        conv.handle_event(&ev(EventKind::TextDelta, json!(" more")));
        assert_eq!(conv.last_message().unwrap().content, "live more");
    }

    #[test]
    fn test_load_history_without_turn_replaces() {
        let mut conv = Conversation::new("s-1");
        conv.load_history(vec![Message::user("old")]);
        assert_eq!(conv.messages().len(), 1);
        assert!(!conv.is_turn_active());
    }

    #[test]
    fn test_replace_history_drops_turn() {
        let mut conv = Conversation::new("s-1");
        conv.begin_turn("x");
        conv.replace_history(vec![Message::user("old")]);
        assert_eq!(conv.messages().len(), 1);
        assert!(!conv.is_turn_active());
    }
}
