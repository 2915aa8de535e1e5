//! End-to-end turns against a scripted model channel.

mod common;

use std::sync::Arc;
use std::time::Duration;

use nonzero_ext::nonzero;
use serde_json::json;

use common::{
    FailingDomain, PanickingDomain, ScriptedConnector, sample_snapshot, tool_call, tool_reply,
};
use fieldservice_assistant::assistant::{Assistant, TurnState};
use fieldservice_assistant::context::{BusinessSnapshot, JobStatus};
use fieldservice_assistant::error::AssistantError;
use fieldservice_assistant::llm::{ChannelInput, ModelReply};
use fieldservice_assistant::rate_limit::RequestLimiter;
use fieldservice_assistant::retrieval::{RetrievalAugmenter, Retriever};
use fieldservice_assistant::session::{Conversation, Role};
use fieldservice_assistant::tools::{DomainService, InMemoryDomainService};

fn in_memory(snapshot: BusinessSnapshot) -> Arc<InMemoryDomainService> {
    Arc::new(InMemoryDomainService::from_snapshot(snapshot))
}

async fn ready_assistant(connector: &ScriptedConnector) -> Assistant {
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(sample_snapshot()),
    )
    .limiter(RequestLimiter::unlimited())
    .build();
    assistant.initialize(sample_snapshot()).await;
    assistant
}

#[tokio::test]
async fn chat_before_initialize_is_rejected_without_model_traffic() {
    let connector = ScriptedConnector::new();
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(BusinessSnapshot::default()),
    )
    .build();
    let mut conversation = Conversation::new();

    let err = assistant.chat("hello", &mut conversation).await.unwrap_err();

    assert!(matches!(err, AssistantError::NotInitialized));
    assert!(!assistant.is_initialized());
    assert_eq!(connector.script.sends(), 0);
    assert!(conversation.is_empty());
}

#[tokio::test]
async fn empty_snapshot_answers_hello_directly() {
    let connector = ScriptedConnector::new();
    connector.script.push_reply(ModelReply::text("Hi! How can I help?"));
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(BusinessSnapshot::default()),
    )
    .build();

    assistant.initialize(BusinessSnapshot::default()).await;
    assert!(assistant.is_initialized());

    let mut conversation = Conversation::new();
    let response = assistant.chat("hello", &mut conversation).await.unwrap();

    assert_eq!(response.response, "Hi! How can I help?");
    assert!(response.tool_calls.is_none());
    assert!(!response.augmented);
    assert_eq!(connector.script.sends(), 1);

    let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(
        assistant.last_trace(),
        vec![TurnState::Idle, TurnState::Sending, TurnState::Idle]
    );
}

#[tokio::test]
async fn rate_limited_turn_never_reaches_the_model() {
    let connector = ScriptedConnector::new();
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(sample_snapshot()),
    )
    .limiter(RequestLimiter::per_minute(nonzero!(1u32)))
    .build();
    assistant.initialize(sample_snapshot()).await;

    let mut conversation = Conversation::new();
    assistant.chat("first", &mut conversation).await.unwrap();
    let sends_after_first = connector.script.sends();
    let messages_after_first = conversation.len();

    let err = assistant.chat("second", &mut conversation).await.unwrap_err();

    assert!(matches!(err, AssistantError::RateLimited { .. }));
    assert_eq!(err.code(), "rate_limited");
    assert!(err.retry_after_secs().is_some_and(|secs| secs >= 1));
    assert_eq!(connector.script.sends(), sends_after_first);
    assert_eq!(conversation.len(), messages_after_first);
}

#[tokio::test]
async fn every_tool_call_is_answered_before_the_follow_up() {
    let connector = ScriptedConnector::new();
    connector.script.push_reply(tool_reply(vec![
        tool_call("call_a", "listJobs", json!({ "status": "Pending" })),
        tool_call("call_b", "findClients", json!({ "query": "acme" })),
        tool_call("call_c", "getOutstandingInvoices", json!({})),
    ]));
    connector
        .script
        .push_reply(ModelReply::text("J1 is pending for Acme Dental, who owes $1,000.00."));
    let assistant = ready_assistant(&connector).await;
    let mut conversation = Conversation::new();

    let response = assistant
        .chat("What is pending for Acme?", &mut conversation)
        .await
        .unwrap();

    let inputs = connector.script.inputs();
    assert_eq!(inputs.len(), 5);
    assert!(matches!(inputs[0], ChannelInput::User { .. }));
    let answered: Vec<&str> = inputs[1..4]
        .iter()
        .map(|input| match input {
            ChannelInput::ToolResponse { call_id, .. } => call_id.as_str(),
            other => panic!("expected a tool response, got {other:?}"),
        })
        .collect();
    assert_eq!(answered, vec!["call_a", "call_b", "call_c"]);
    assert_eq!(inputs[4], ChannelInput::Continue);

    let executed = response.tool_calls.expect("tool calls reported");
    assert_eq!(executed.len(), 3);
    assert!(executed.iter().all(|call| call.result.success));

    let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Tool, Role::Tool, Role::Tool, Role::Assistant]
    );
    assert_eq!(
        conversation.messages()[1].tool_name.as_deref(),
        Some("listJobs")
    );
    assert_eq!(
        assistant.last_trace(),
        vec![
            TurnState::Idle,
            TurnState::Sending,
            TurnState::AwaitingToolResults { round: 1 },
            TurnState::Finalizing { round: 1 },
            TurnState::Idle,
        ]
    );
}

#[tokio::test]
async fn update_job_status_marks_the_job_completed() {
    let connector = ScriptedConnector::new();
    connector.script.push_reply(tool_reply(vec![tool_call(
        "call_1",
        "updateJobStatus",
        json!({ "jobId": "J1", "status": "Completed" }),
    )]));
    connector.script.push_reply(ModelReply::text("J1 is now completed."));

    let domain = in_memory(sample_snapshot());
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        Arc::clone(&domain) as Arc<dyn DomainService>,
    )
    .build();
    let installed = assistant.initialize(sample_snapshot()).await;
    let mut conversation = Conversation::new();

    let response = assistant
        .chat("Mark J1 as completed", &mut conversation)
        .await
        .unwrap();

    let executed = response.tool_calls.unwrap();
    assert!(executed[0].result.success);
    assert_eq!(response.response, "J1 is now completed.");

    let live = assistant.snapshot().unwrap();
    assert_eq!(live.job("J1").unwrap().status, JobStatus::Completed);
    assert_eq!(live.version, installed.version);
    assert!(live.revision > installed.revision);
    // The snapshot the turn started from is never edited in place.
    assert_eq!(installed.job("J1").unwrap().status, JobStatus::Pending);

    let backend = domain.fetch_snapshot().await.unwrap();
    assert_eq!(backend.job("J1").unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn unknown_function_is_reported_and_the_turn_completes() {
    let connector = ScriptedConnector::new();
    connector.script.push_reply(tool_reply(vec![tool_call(
        "call_1",
        "doesNotExist",
        json!({}),
    )]));
    connector
        .script
        .push_reply(ModelReply::text("Sorry, I can't do that."));
    let assistant = ready_assistant(&connector).await;
    let mut conversation = Conversation::new();

    let response = assistant.chat("Do a thing", &mut conversation).await.unwrap();

    let executed = response.tool_calls.unwrap();
    assert!(!executed[0].result.success);
    assert_eq!(
        executed[0].result.error_message.as_deref(),
        Some("Unknown function doesNotExist")
    );
    assert_eq!(response.response, "Sorry, I can't do that.");
}

#[tokio::test]
async fn failing_backend_becomes_a_failed_tool_result() {
    let connector = ScriptedConnector::new();
    connector.script.push_reply(tool_reply(vec![tool_call(
        "call_1",
        "updateJobStatus",
        json!({ "jobId": "J1", "status": "Completed" }),
    )]));
    connector
        .script
        .push_reply(ModelReply::text("The update did not go through."));
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        Arc::new(FailingDomain {
            snapshot: sample_snapshot(),
        }),
    )
    .build();
    assistant.refresh_from_domain().await.unwrap();
    let mut conversation = Conversation::new();

    let response = assistant.chat("Close out J1", &mut conversation).await.unwrap();

    let result = &response.tool_calls.unwrap()[0].result;
    assert!(!result.success);
    assert!(
        result
            .error_message
            .as_deref()
            .unwrap()
            .contains("backend rejected update of J1")
    );
    let live = assistant.snapshot().unwrap();
    assert_eq!(live.job("J1").unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn panicking_handler_does_not_abort_the_turn() {
    let connector = ScriptedConnector::new();
    connector.script.push_reply(tool_reply(vec![tool_call(
        "call_1",
        "updateJobStatus",
        json!({ "jobId": "J1", "status": "Completed" }),
    )]));
    connector
        .script
        .push_reply(ModelReply::text("Something went wrong on our side."));
    let assistant = Assistant::builder(Arc::new(connector.clone()), Arc::new(PanickingDomain)).build();
    assistant.refresh_from_domain().await.unwrap();
    let mut conversation = Conversation::new();

    let response = assistant.chat("Close out J1", &mut conversation).await.unwrap();

    let result = &response.tool_calls.unwrap()[0].result;
    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("updateJobStatus failed unexpectedly")
    );
    assert_eq!(response.response, "Something went wrong on our side.");
}

#[tokio::test]
async fn tool_round_limit_ends_the_turn() {
    let connector = ScriptedConnector::new();
    connector.script.always(tool_reply(vec![tool_call(
        "call_loop",
        "listJobs",
        json!({}),
    )]));
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(sample_snapshot()),
    )
    .max_tool_rounds(2)
    .build();
    assistant.initialize(sample_snapshot()).await;
    let mut conversation = Conversation::new();

    let err = assistant.chat("List jobs forever", &mut conversation).await.unwrap_err();

    match err {
        AssistantError::ToolRoundLimit { rounds, pending } => {
            assert_eq!(rounds, 2);
            assert_eq!(pending, vec!["listJobs".to_string()]);
        }
        other => panic!("expected round limit, got {other:?}"),
    }
    // user + 2 rounds x (1 response + continue)
    assert_eq!(connector.script.sends(), 5);
    assert_eq!(assistant.last_trace().last(), Some(&TurnState::Idle));
}

#[tokio::test]
async fn channel_failure_is_terminal_and_resets_the_machine() {
    let connector = ScriptedConnector::new();
    let assistant = ready_assistant(&connector).await;
    connector.script.fail_sends();
    let mut conversation = Conversation::new();

    let err = assistant.chat("hello", &mut conversation).await.unwrap_err();

    assert!(matches!(err, AssistantError::Channel(_)));
    assert_eq!(err.code(), "channel_failure");
    assert_eq!(connector.script.sends(), 1);
    assert_eq!(
        assistant.last_trace(),
        vec![TurnState::Idle, TurnState::Sending, TurnState::Idle]
    );
}

#[tokio::test(start_paused = true)]
async fn slow_channel_times_out() {
    let connector = ScriptedConnector::new();
    connector.script.hold_next_user();
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(sample_snapshot()),
    )
    .channel_timeout(Duration::from_secs(5))
    .build();
    assistant.initialize(sample_snapshot()).await;
    let mut conversation = Conversation::new();

    let err = assistant.chat("hello", &mut conversation).await.unwrap_err();

    assert!(matches!(err, AssistantError::Timeout { .. }));
    assert_eq!(err.code(), "channel_timeout");
}

#[tokio::test]
async fn refresh_during_a_turn_does_not_change_what_the_turn_sees() {
    let connector = ScriptedConnector::new();
    let assistant = Arc::new(ready_assistant(&connector).await);
    let first_session = assistant.session_id().await.unwrap();
    let first_version = assistant.snapshot().unwrap().version;

    connector.script.hold_next_user();
    let in_flight = {
        let assistant = Arc::clone(&assistant);
        tokio::spawn(async move {
            let mut conversation = Conversation::new();
            assistant.chat("How many jobs?", &mut conversation).await
        })
    };
    connector.script.entered.notified().await;

    let mut refreshed = sample_snapshot();
    refreshed.jobs.truncate(1);
    let installed = assistant.refresh(refreshed).await;
    assert!(installed.version > first_version);

    connector.script.release.notify_one();
    let during = in_flight.await.unwrap().unwrap();
    assert_eq!(during.snapshot_version, first_version);
    assert_eq!(during.session_id, first_session);

    let mut conversation = Conversation::new();
    let after = assistant.chat("And now?", &mut conversation).await.unwrap();
    assert_eq!(after.snapshot_version, installed.version);
    assert_ne!(after.session_id, first_session);

    // One channel for the first snapshot and one for the refresh.
    assert_eq!(connector.script.instructions().len(), 2);
}

#[tokio::test]
async fn tools_in_a_turn_read_the_snapshot_it_started_with() {
    let connector = ScriptedConnector::new();
    let assistant = Arc::new(ready_assistant(&connector).await);
    connector
        .script
        .push_reply(tool_reply(vec![tool_call("call_1", "listJobs", json!({}))]));
    connector.script.push_reply(ModelReply::text("You have two jobs."));

    connector.script.hold_next_user();
    let in_flight = {
        let assistant = Arc::clone(&assistant);
        tokio::spawn(async move {
            let mut conversation = Conversation::new();
            assistant.chat("List my jobs", &mut conversation).await
        })
    };
    connector.script.entered.notified().await;

    let mut refreshed = sample_snapshot();
    refreshed.jobs.truncate(1);
    assistant.refresh(refreshed).await;
    assert_eq!(assistant.snapshot().unwrap().jobs.len(), 1);

    connector.script.release.notify_one();
    let during = in_flight.await.unwrap().unwrap();
    let calls = during.tool_calls.unwrap();
    let payload = calls[0].result.payload.as_ref().unwrap();
    assert_eq!(payload["total"], 2);
    assert_eq!(payload["jobs"][1]["id"], "J2");

    let answered = connector.script.inputs().into_iter().find_map(|input| match input {
        ChannelInput::ToolResponse { result, .. } => result.payload,
        _ => None,
    });
    assert_eq!(answered.unwrap()["total"], 2);

    // The next turn runs against the refreshed snapshot.
    connector
        .script
        .push_reply(tool_reply(vec![tool_call("call_2", "listJobs", json!({}))]));
    let mut conversation = Conversation::new();
    let after = assistant.chat("And now?", &mut conversation).await.unwrap();
    let calls = after.tool_calls.unwrap();
    assert_eq!(calls[0].result.payload.as_ref().unwrap()["total"], 1);
}

#[derive(Debug)]
struct FixedRetriever(&'static str);

#[async_trait::async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, _query: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

#[tokio::test]
async fn empty_retrieval_sends_the_message_unchanged() {
    let connector = ScriptedConnector::new();
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(sample_snapshot()),
    )
    .augmenter(RetrievalAugmenter::new(
        Arc::new(FixedRetriever("")),
        Duration::from_secs(1),
    ))
    .build();
    assistant.initialize(sample_snapshot()).await;
    let mut conversation = Conversation::new();

    let response = assistant
        .chat("When is J2 scheduled?", &mut conversation)
        .await
        .unwrap();

    assert!(!response.augmented);
    assert_eq!(
        connector.script.inputs()[0],
        ChannelInput::user("When is J2 scheduled?")
    );
}

#[tokio::test]
async fn retrieved_context_is_sent_but_not_recorded() {
    let connector = ScriptedConnector::new();
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(sample_snapshot()),
    )
    .augmenter(RetrievalAugmenter::new(
        Arc::new(FixedRetriever("Water heaters need a permit in this county.")),
        Duration::from_secs(1),
    ))
    .build();
    assistant.initialize(sample_snapshot()).await;
    let mut conversation = Conversation::new();

    let response = assistant
        .chat("Do we need a permit for J1?", &mut conversation)
        .await
        .unwrap();

    assert!(response.augmented);
    match &connector.script.inputs()[0] {
        ChannelInput::User { text } => {
            assert!(text.contains("Water heaters need a permit"));
            assert!(text.contains("Do we need a permit for J1?"));
        }
        other => panic!("expected user input, got {other:?}"),
    }
    assert_eq!(conversation.messages()[0].content, "Do we need a permit for J1?");
}

#[tokio::test]
async fn session_instruction_carries_summary_and_tools() {
    let connector = ScriptedConnector::new();
    let _assistant = ready_assistant(&connector).await;

    let instructions = connector.script.instructions();
    assert_eq!(instructions.len(), 1);
    let instruction = &instructions[0];
    assert!(instruction.system_instruction.contains("Northside Plumbing"));
    assert!(instruction.system_instruction.contains("## Current business snapshot"));
    assert!(instruction.system_instruction.contains("Acme Dental"));
    assert_eq!(instruction.tools.len(), 6);
}

#[tokio::test]
async fn disabled_tools_are_not_declared_or_dispatched() {
    let connector = ScriptedConnector::new();
    connector.script.push_reply(tool_reply(vec![tool_call(
        "call_1",
        "updateJobStatus",
        json!({ "jobId": "J1", "status": "Completed" }),
    )]));
    let assistant = Assistant::builder(
        Arc::new(connector.clone()),
        in_memory(sample_snapshot()),
    )
    .enabled_tools(vec!["listJobs".to_string(), "findClients".to_string()])
    .build();
    assistant.initialize(sample_snapshot()).await;
    let mut conversation = Conversation::new();

    let response = assistant.chat("Mark J1 done", &mut conversation).await.unwrap();

    assert_eq!(connector.script.instructions()[0].tools.len(), 2);
    let result = &response.tool_calls.unwrap()[0].result;
    assert_eq!(
        result.error_message.as_deref(),
        Some("Unknown function updateJobStatus")
    );
    let live = assistant.snapshot().unwrap();
    assert_eq!(live.job("J1").unwrap().status, JobStatus::Pending);
}
