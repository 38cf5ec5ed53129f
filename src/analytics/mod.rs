//! Usage analytics
//!
//! The aggregate keeps a capped event log plus counters derived from the
//! persisted conversations. Counts are never maintained by separate live
//! counters: [`AnalyticsService::resync`] recomputes them from the stored
//! conversation document, and the conversation store calls it after every
//! mutation it persists.

use crate::chat::types::{ChatMessage, ConversationsDocument, Feedback};
use crate::providers::Role;
use crate::storage::{self, KeyValueStore, ANALYTICS_KEY, CONVERSATIONS_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Most recent events retained
pub const MAX_EVENTS: usize = 100;

/// Response gaps at or above this many milliseconds are treated as outliers
pub const RESPONSE_TIME_CUTOFF_MS: i64 = 5 * 60 * 1000;

const QUERY_MAX_CHARS: usize = 100;
const TOP_QUERIES: usize = 5;

pub const EVENT_SESSION_START: &str = "session_start";
pub const EVENT_NEW_CONVERSATION: &str = "new_conversation";
pub const EVENT_USER_MESSAGE: &str = "user_message";
pub const EVENT_ASSISTANT_RESPONSE: &str = "assistant_response";
pub const EVENT_MESSAGE_FEEDBACK: &str = "message_feedback";
pub const EVENT_CONVERSATION_DELETED: &str = "conversation_deleted";
pub const EVENT_STREAMING_START: &str = "streaming_start";
pub const EVENT_STREAMING_END: &str = "streaming_end";
pub const EVENT_CHAT_ERROR: &str = "chat_error";

/// Analytics service shared between the conversation store and reports
pub type SharedAnalytics = Arc<Mutex<AnalyticsService>>;

/// One tracked event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl AnalyticsEvent {
    fn message_id(&self) -> Option<&str> {
        self.properties.get("message_id").and_then(Value::as_str)
    }
}

/// Persisted aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsState {
    pub session_id: String,
    pub conversation_count: usize,
    pub message_count: usize,
    pub response_time_sum: i64,
    pub response_time_count: usize,
    pub query_counts: HashMap<String, usize>,
    pub events: Vec<AnalyticsEvent>,
    /// Send time (epoch ms) of user messages still awaiting an answer
    pub user_message_timestamps: HashMap<String, i64>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Derived report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub session_id: String,
    pub conversation_count: usize,
    pub message_count: usize,
    /// Mean user→assistant latency in milliseconds, 0 when unknown
    pub average_response_time: f64,
    pub top_queries: Vec<String>,
    pub events: Vec<AnalyticsEvent>,
    pub helpful_count: usize,
    pub unhelpful_count: usize,
    pub total_feedback: usize,
}

fn query_fingerprint(content: &str) -> String {
    let truncated: String = content.chars().take(QUERY_MAX_CHARS).collect();
    truncated.trim().to_string()
}

/// Latency between two epoch-ms stamps when it is a usable sample
///
/// Gaps that overflow, are not positive, or reach the cutoff yield `None`.
fn response_gap(sent_ms: i64, answered_ms: i64) -> Option<i64> {
    answered_ms
        .checked_sub(sent_ms)
        .filter(|gap| *gap > 0 && *gap < RESPONSE_TIME_CUTOFF_MS)
}

fn props(pairs: Vec<(&str, Value)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Analytics aggregator backed by the local key-value store
pub struct AnalyticsService {
    store: Arc<dyn KeyValueStore>,
    state: AnalyticsState,
}

impl AnalyticsService {
    /// Load the persisted aggregate, resync it and record a session start
    ///
    /// Unreadable state is discarded rather than reported; the session id
    /// survives across loads.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let state = match storage::load_json::<AnalyticsState>(store.as_ref(), ANALYTICS_KEY) {
            Ok(Some(state)) => state,
            Ok(None) => AnalyticsState::default(),
            Err(e) => {
                tracing::error!("Error loading analytics data: {}", e);
                AnalyticsState::default()
            }
        };

        let mut service = Self { store, state };
        // no request from an earlier process can still be answered
        service.state.user_message_timestamps.clear();
        service.resync();

        if service.state.session_id.is_empty() {
            service.state.session_id = ulid::Ulid::new().to_string();
            tracing::debug!(session = %service.state.session_id, "Started analytics session");
        }

        let session_id = service.state.session_id.clone();
        service.track_event(
            EVENT_SESSION_START,
            props(vec![
                ("session_id", Value::from(session_id)),
                ("client", Value::from(concat!("helpdesk/", env!("CARGO_PKG_VERSION")))),
            ]),
        );
        service
    }

    /// Wrap in the shared handle used by the conversation store
    pub fn shared(self) -> SharedAnalytics {
        Arc::new(Mutex::new(self))
    }

    /// Current aggregate
    pub fn state(&self) -> &AnalyticsState {
        &self.state
    }

    fn save(&mut self) {
        self.state.last_updated = Some(Utc::now());
        if let Err(e) = storage::save_json(self.store.as_ref(), ANALYTICS_KEY, &self.state) {
            tracing::error!("Error saving analytics data: {}", e);
        }
    }

    fn push_event(&mut self, name: &str, properties: Map<String, Value>) {
        tracing::debug!(event = name, "analytics event");
        self.state.events.push(AnalyticsEvent {
            event_name: name.to_string(),
            timestamp: Utc::now(),
            properties,
        });
        if self.state.events.len() > MAX_EVENTS {
            let excess = self.state.events.len() - MAX_EVENTS;
            self.state.events.drain(..excess);
        }
    }

    /// Append an event and persist
    pub fn track_event(&mut self, name: &str, properties: Map<String, Value>) {
        self.push_event(name, properties);
        self.save();
    }

    /// Record a user message: its query fingerprint and its send time
    pub fn track_user_message(&mut self, message_id: &str, content: &str) {
        self.record_user_message_at(message_id, content, Utc::now().timestamp_millis());
    }

    fn record_user_message_at(&mut self, message_id: &str, content: &str, now_ms: i64) {
        self.state
            .user_message_timestamps
            .insert(message_id.to_string(), now_ms);

        let query = query_fingerprint(content);
        if !query.is_empty() {
            *self.state.query_counts.entry(query).or_insert(0) += 1;
        }

        self.track_event(
            EVENT_USER_MESSAGE,
            props(vec![
                ("message_id", Value::from(message_id)),
                ("content_length", Value::from(content.chars().count())),
                ("contains_question", Value::from(content.contains('?'))),
                ("contains_code_block", Value::from(content.contains("```"))),
            ]),
        );
    }

    /// Forget the send time of a user message that will never be answered
    pub fn discard_pending(&mut self, user_message_id: &str) {
        if self
            .state
            .user_message_timestamps
            .remove(user_message_id)
            .is_some()
        {
            tracing::debug!(message = user_message_id, "Dropped pending response timer");
            self.save();
        }
    }

    /// Record an assistant answer and its latency
    pub fn track_assistant_response(
        &mut self,
        message_id: &str,
        user_message_id: &str,
        content_length: usize,
    ) {
        self.record_response_at(
            message_id,
            user_message_id,
            content_length,
            Utc::now().timestamp_millis(),
        );
    }

    fn record_response_at(
        &mut self,
        message_id: &str,
        user_message_id: &str,
        content_length: usize,
        now_ms: i64,
    ) {
        let mut properties = props(vec![
            ("message_id", Value::from(message_id)),
            ("content_length", Value::from(content_length)),
        ]);

        if let Some(sent) = self.state.user_message_timestamps.remove(user_message_id) {
            properties.insert("user_message_id".into(), Value::from(user_message_id));
            if let Some(response_time) = response_gap(sent, now_ms) {
                self.state.response_time_sum =
                    self.state.response_time_sum.saturating_add(response_time);
                self.state.response_time_count += 1;
                properties.insert("response_time".into(), Value::from(response_time));
            }
        }

        self.track_event(EVENT_ASSISTANT_RESPONSE, properties);
    }

    /// Record a new conversation
    pub fn track_new_conversation(&mut self, conversation_id: &str) {
        self.track_event(
            EVENT_NEW_CONVERSATION,
            props(vec![("conversation_id", Value::from(conversation_id))]),
        );
    }

    /// Record feedback on a message, replacing earlier feedback on it
    pub fn track_feedback(&mut self, message_id: &str, feedback: Feedback, conversation_id: &str) {
        self.state.events.retain(|e| {
            !(e.event_name == EVENT_MESSAGE_FEEDBACK && e.message_id() == Some(message_id))
        });
        self.track_event(
            EVENT_MESSAGE_FEEDBACK,
            props(vec![
                ("message_id", Value::from(message_id)),
                ("feedback_type", Value::from(feedback.as_str())),
                ("conversation_id", Value::from(conversation_id)),
            ]),
        );
    }

    /// Recompute every derived count from the persisted conversations
    ///
    /// Feedback events are rebuilt from message-level feedback, at most one
    /// per message. Answered user messages missing an `assistant_response`
    /// event get one stamped with the answer's time, and pending response
    /// timers for messages no longer stored are dropped. A missing or
    /// unreadable conversation document leaves the aggregate untouched.
    pub fn resync(&mut self) {
        let document =
            match storage::load_json::<ConversationsDocument>(self.store.as_ref(), CONVERSATIONS_KEY)
            {
                Ok(Some(document)) => document,
                Ok(None) => return,
                Err(e) => {
                    tracing::error!("Error syncing analytics with chat data: {}", e);
                    return;
                }
            };

        self.state.conversation_count = 0;
        self.state.message_count = 0;
        self.state.query_counts.clear();
        self.state.response_time_sum = 0;
        self.state.response_time_count = 0;
        self.state
            .events
            .retain(|e| e.event_name != EVENT_MESSAGE_FEEDBACK);

        let answered: HashSet<String> = self
            .state
            .events
            .iter()
            .filter(|e| e.event_name == EVENT_ASSISTANT_RESPONSE)
            .filter_map(|e| e.message_id().map(str::to_string))
            .collect();
        let mut user_ids = HashSet::new();
        let mut backfill = Vec::new();
        let mut feedback_events = Vec::new();
        for conversation in &document.conversations {
            self.state.conversation_count += 1;
            self.state.message_count += conversation.messages.len();

            for (i, message) in conversation.messages.iter().enumerate() {
                if message.role == Role::User {
                    user_ids.insert(message.id.as_str());
                    let query = query_fingerprint(&message.content);
                    if !query.is_empty() {
                        *self.state.query_counts.entry(query).or_insert(0) += 1;
                    }

                    let next = conversation
                        .messages
                        .get(i + 1)
                        .filter(|next| next.role == Role::Assistant);
                    if let Some(next) = next {
                        if let Some(gap) = response_gap(message.timestamp, next.timestamp) {
                            self.state.response_time_sum =
                                self.state.response_time_sum.saturating_add(gap);
                            self.state.response_time_count += 1;

                            if !answered.contains(&next.id) {
                                backfill.extend(Self::backfilled_response(message, next, gap));
                            }
                        }
                    }
                }

                if let Some(feedback) = message.feedback {
                    feedback_events.push(props(vec![
                        ("message_id", Value::from(message.id.as_str())),
                        ("feedback_type", Value::from(feedback.as_str())),
                        ("conversation_id", Value::from(conversation.id.as_str())),
                    ]));
                }
            }
        }

        self.state
            .user_message_timestamps
            .retain(|id, _| user_ids.contains(id.as_str()));

        if !backfill.is_empty() {
            tracing::debug!(events = backfill.len(), "Backfilled assistant responses");
            self.state.events.extend(backfill);
            self.state.events.sort_by_key(|e| e.timestamp);
            if self.state.events.len() > MAX_EVENTS {
                let excess = self.state.events.len() - MAX_EVENTS;
                self.state.events.drain(..excess);
            }
        }

        for properties in feedback_events {
            self.push_event(EVENT_MESSAGE_FEEDBACK, properties);
        }

        tracing::debug!(
            conversations = self.state.conversation_count,
            messages = self.state.message_count,
            "Analytics resynced"
        );
        self.save();
    }

    fn backfilled_response(
        question: &ChatMessage,
        answer: &ChatMessage,
        gap: i64,
    ) -> Option<AnalyticsEvent> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(answer.timestamp)?;
        Some(AnalyticsEvent {
            event_name: EVENT_ASSISTANT_RESPONSE.to_string(),
            timestamp,
            properties: props(vec![
                ("message_id", Value::from(answer.id.as_str())),
                ("user_message_id", Value::from(question.id.as_str())),
                ("content_length", Value::from(answer.content.chars().count())),
                ("response_time", Value::from(gap)),
            ]),
        })
    }

    /// Compute the report
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let feedback_of = |kind: Feedback| {
            self.state
                .events
                .iter()
                .filter(|e| e.event_name == EVENT_MESSAGE_FEEDBACK)
                .filter(|e| {
                    e.properties.get("feedback_type").and_then(Value::as_str) == Some(kind.as_str())
                })
                .count()
        };
        let helpful_count = feedback_of(Feedback::Helpful);
        let unhelpful_count = feedback_of(Feedback::Unhelpful);

        let mut queries: Vec<(&String, &usize)> = self.state.query_counts.iter().collect();
        queries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let top_queries = queries
            .into_iter()
            .take(TOP_QUERIES)
            .map(|(q, _)| q.clone())
            .collect();

        let average_response_time = if self.state.response_time_count > 0 {
            self.state.response_time_sum as f64 / self.state.response_time_count as f64
        } else {
            0.0
        };

        AnalyticsSnapshot {
            session_id: self.state.session_id.clone(),
            conversation_count: self.state.conversation_count,
            message_count: self.state.message_count,
            average_response_time,
            top_queries,
            events: self.state.events.clone(),
            helpful_count,
            unhelpful_count,
            total_feedback: helpful_count + unhelpful_count,
        }
    }

    /// Drop the persisted aggregate and start over with a fresh session
    pub fn reset(&mut self) {
        if let Err(e) = self.store.remove(ANALYTICS_KEY) {
            tracing::error!("Error clearing analytics data: {}", e);
        }
        self.state = AnalyticsState {
            session_id: ulid::Ulid::new().to_string(),
            ..Default::default()
        };
        self.resync();
        self.save();
    }
}
