mod common;

use chatdesk_lib::gateway::InferenceError;
use chatdesk_lib::models::Role;
use chatdesk_lib::orchestrator::{ChatError, ChatRequest};
use chatdesk_lib::translation::TranslationBridge;
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn request(message: &str, conversation_id: Option<&str>) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        model_id: Some(HOSTED.to_string()),
        conversation_id: conversation_id.map(str::to_string),
        document: None,
    }
}

#[tokio::test]
async fn first_turn_creates_conversation_with_one_exchange() {
    let provider = Arc::new(RecordingProvider::replying("Hello! How can I help with DGCA rules?"));
    let h = harness(provider.clone(), TranslationBridge::disabled());

    let reply = h.orchestrator.chat(request("Hello", None)).await.unwrap();
    assert_eq!(reply.reply, "Hello! How can I help with DGCA rules?");
    assert_eq!(reply.model_id, HOSTED);
    assert_eq!(reply.language, "en");
    assert!(!reply.conversation_id.is_empty());

    let convo = h.orchestrator.get_conversation(&reply.conversation_id).await.unwrap();
    let messages = convo.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!((messages[0].role, messages[0].content.as_str()), (Role::User, "Hello"));
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, reply.reply);

    let frame = provider.last_frame();
    assert_eq!(frame.system_count(), 1);
    assert_eq!(frame.messages[0].content, DIRECTIVE);
    assert_eq!(frame.messages.last().unwrap().content, "Hello");
}

#[tokio::test]
async fn each_turn_adds_two_messages_and_language_change_adds_one_note() {
    let provider = Arc::new(RecordingProvider::echo());
    let h = harness(provider.clone(), TranslationBridge::disabled());

    let first = h.orchestrator.chat(request("What is a CPL?", Some("c1"))).await.unwrap();
    assert_eq!(first.conversation_id, "c1");
    for question in ["Minimum age?", "Medical class?"] {
        h.orchestrator.chat(request(question, Some("c1"))).await.unwrap();
    }
    assert_eq!(h.orchestrator.get_conversation("c1").await.unwrap().messages().len(), 6);

    let change = h
        .orchestrator
        .chat(request("Please speak in French", Some("c1")))
        .await
        .unwrap();
    assert_eq!(change.reply, "Language preference updated to 'fr'.");
    assert_eq!(change.language, "fr");
    assert_eq!(provider.calls(), 3, "a language change never reaches the model");

    let convo = h.orchestrator.get_conversation("c1").await.unwrap();
    assert_eq!(convo.messages().len(), 7);
    let note = convo.messages().last().unwrap();
    assert_eq!(note.role, Role::System);
    assert_eq!(note.content, "Preferred language changed to 'fr'.");
    assert_eq!(convo.preferred_language, "fr");
}

#[tokio::test]
async fn unnamed_language_change_uses_detected_language() {
    let provider = Arc::new(RecordingProvider::echo());
    let translator = PhrasebookTranslator::default().detects("भाषा बदलो", "hi");
    let h = harness(provider.clone(), TranslationBridge::new(Arc::new(translator)));

    let reply = h.orchestrator.chat(request("भाषा बदलो", Some("c1"))).await.unwrap();
    assert_eq!(reply.language, "hi");
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn french_conversation_is_stored_in_english_and_answered_in_french() {
    let provider = Arc::new(RecordingProvider::replying("Hello! How can I help?"));
    let translator = PhrasebookTranslator::default()
        .detects("Bonjour", "fr")
        .knows("Bonjour", "fr", "en", "Hello")
        .knows("Hello! How can I help?", "en", "fr", "Bonjour ! Comment puis-je vous aider ?");
    let h = harness(provider.clone(), TranslationBridge::new(Arc::new(translator)));

    h.store.get_or_create(Some("c-fr"), HOSTED);
    h.orchestrator.set_conversation_language("c-fr", "fr").await.unwrap();

    let reply = h.orchestrator.chat(request("Bonjour", Some("c-fr"))).await.unwrap();
    assert_eq!(reply.reply, "Bonjour ! Comment puis-je vous aider ?");
    assert_eq!(reply.language, "fr");

    let convo = h.orchestrator.get_conversation("c-fr").await.unwrap();
    assert_eq!(convo.messages()[0].content, "Hello");
    assert_eq!(convo.messages()[1].content, "Hello! How can I help?");
    assert_eq!(provider.last_frame().messages.last().unwrap().content, "Hello");
}

#[tokio::test]
async fn translation_outage_still_completes_the_turn() {
    let provider = Arc::new(RecordingProvider::replying("Here is the answer."));
    let h = harness(provider.clone(), TranslationBridge::new(Arc::new(OfflineTranslator)));

    h.store.get_or_create(Some("c1"), HOSTED);
    h.orchestrator.set_conversation_language("c1", "de").await.unwrap();

    let reply = h.orchestrator.chat(request("Hallo", Some("c1"))).await.unwrap();
    assert_eq!(reply.reply, "Here is the answer.");
    let convo = h.orchestrator.get_conversation("c1").await.unwrap();
    assert_eq!(convo.messages()[0].content, "Hallo");
    assert_eq!(convo.messages().len(), 2);
}

#[tokio::test]
async fn unknown_model_is_rejected_without_touching_the_store() {
    let provider = Arc::new(RecordingProvider::echo());
    let h = harness(provider.clone(), TranslationBridge::disabled());

    let mut req = request("Hello", Some("c1"));
    req.model_id = Some("gpt-17".to_string());
    let err = h.orchestrator.chat(req).await.unwrap_err();
    match &err {
        ChatError::UnknownModel(unknown) => {
            assert_eq!(unknown.key, "gpt-17");
            assert!(unknown.valid.contains(&HOSTED.to_string()));
            assert!(unknown.valid.contains(&LOCAL.to_string()));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains("Choose from"));
    assert!(h.store.is_empty());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let h = harness(Arc::new(RecordingProvider::echo()), TranslationBridge::disabled());
    let err = h.orchestrator.chat(request("   ", None)).await.unwrap_err();
    assert_eq!(err, ChatError::EmptyMessage);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn local_out_of_memory_becomes_recorded_diagnostic() {
    let h = harness(Arc::new(RecordingProvider::echo()), TranslationBridge::disabled());

    let mut req = request("Summarise CAR-66", None);
    req.model_id = Some(LOCAL.to_string());
    let reply = h.orchestrator.chat(req).await.unwrap();
    assert_eq!(reply.reply, InferenceError::OutOfMemory.to_string());
    assert_eq!(reply.model_id, LOCAL);

    let convo = h.orchestrator.get_conversation(&reply.conversation_id).await.unwrap();
    assert_eq!(convo.messages().len(), 2);
    assert_eq!(convo.messages()[1].role, Role::Assistant);
    assert_eq!(convo.messages()[1].content, reply.reply);
}

#[tokio::test]
async fn hosted_failure_reply_is_the_diagnostic() {
    let provider = Arc::new(RecordingProvider::failing(InferenceError::Status {
        status: 503,
        body: "overloaded".to_string(),
    }));
    let h = harness(provider, TranslationBridge::disabled());

    let reply = h.orchestrator.chat(request("Hello", None)).await.unwrap();
    assert_eq!(reply.reply, "❌ API Error 503: overloaded");
}

#[tokio::test]
async fn document_context_is_sent_but_not_stored() {
    let provider = Arc::new(RecordingProvider::echo());
    let h = harness(provider.clone(), TranslationBridge::disabled());

    let mut req = request("What does the attachment say?", Some("c1"));
    req.document = Some(b"this is not a pdf".to_vec());
    h.orchestrator.chat(req).await.unwrap();

    let frame = provider.last_frame();
    assert_eq!(frame.system_count(), 1);
    assert!(frame.messages[0].content.contains("Error reading PDF"));

    let convo = h.orchestrator.get_conversation("c1").await.unwrap();
    assert!(convo
        .messages()
        .iter()
        .all(|m| !m.content.contains("Error reading PDF")));
}

#[tokio::test]
async fn chat_switches_conversation_model() {
    let h = harness(Arc::new(RecordingProvider::echo()), TranslationBridge::disabled());
    h.orchestrator.chat(request("Hello", Some("c1"))).await.unwrap();

    let mut req = request("Again", Some("c1"));
    req.model_id = Some("gemma2-9b".to_string());
    h.orchestrator.chat(req).await.unwrap();
    assert_eq!(h.orchestrator.get_conversation("c1").await.unwrap().model_id, "gemma2-9b");
}

#[tokio::test]
async fn default_model_is_used_when_none_given() {
    let h = harness(Arc::new(RecordingProvider::echo()), TranslationBridge::disabled());
    let mut req = request("Hello", None);
    req.model_id = None;
    let reply = h.orchestrator.chat(req).await.unwrap();
    assert_eq!(reply.model_id, HOSTED);
}

#[tokio::test]
async fn deletion_is_idempotent() {
    let h = harness(Arc::new(RecordingProvider::echo()), TranslationBridge::disabled());
    h.orchestrator.chat(request("Hello", Some("a"))).await.unwrap();
    h.orchestrator.chat(request("Hello", Some("b"))).await.unwrap();

    assert!(h.orchestrator.delete_conversation("a"));
    assert_eq!(h.store.len(), 1);
    assert!(!h.orchestrator.delete_conversation("a"));
    assert_eq!(h.store.len(), 1);
    assert!(matches!(
        h.orchestrator.get_conversation("a").await,
        Err(ChatError::ConversationNotFound(_))
    ));
}

#[tokio::test]
async fn model_and_language_updates_validate_input() {
    let h = harness(Arc::new(RecordingProvider::echo()), TranslationBridge::disabled());
    assert!(matches!(
        h.orchestrator.set_conversation_model("missing", HOSTED).await,
        Err(ChatError::ConversationNotFound(_))
    ));

    h.store.get_or_create(Some("c1"), HOSTED);
    assert!(matches!(
        h.orchestrator.set_conversation_model("c1", "gpt-17").await,
        Err(ChatError::UnknownModel(_))
    ));
    h.orchestrator.set_conversation_model("c1", LOCAL).await.unwrap();
    assert_eq!(
        h.orchestrator.set_conversation_language("c1", "FR-ca").await.unwrap(),
        "fr"
    );
    assert_eq!(
        h.orchestrator.set_conversation_language("c1", " ").await,
        Err(ChatError::EmptyLanguage)
    );

    let convo = h.orchestrator.get_conversation("c1").await.unwrap();
    assert_eq!(convo.model_id, LOCAL);
    assert_eq!(convo.preferred_language, "fr");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_turns_on_one_conversation_do_not_interleave() {
    let provider = Arc::new(RecordingProvider::slow(Duration::from_millis(10)));
    let h = harness(provider, TranslationBridge::disabled());

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.chat(request(&format!("question {i}"), Some("shared"))).await })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let convo = h.orchestrator.get_conversation("shared").await.unwrap();
    let messages = convo.messages();
    assert_eq!(messages.len(), 10);
    for pair in messages.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
        assert_eq!(pair[1].content, format!("echo: {}", pair[0].content));
    }
}

#[tokio::test]
async fn chat_without_model_keeps_the_conversation_model() {
    let h = harness(Arc::new(RecordingProvider::echo()), TranslationBridge::disabled());
    h.orchestrator.chat(request("Hello", Some("c1"))).await.unwrap();
    h.orchestrator.set_conversation_model("c1", "gemma2-9b").await.unwrap();

    let mut req = request("And the medical?", Some("c1"));
    req.model_id = None;
    let reply = h.orchestrator.chat(req).await.unwrap();
    assert_eq!(reply.model_id, "gemma2-9b");
    assert_eq!(h.orchestrator.get_conversation("c1").await.unwrap().model_id, "gemma2-9b");
}

#[tokio::test]
async fn abandoned_turn_still_completes_and_is_recorded() {
    let provider = Arc::new(RecordingProvider::slow(Duration::from_millis(200)));
    let h = harness(provider.clone(), TranslationBridge::disabled());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator.chat(request("What is a CPL?", Some("c1"))),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(provider.calls(), 1);
    let convo = h.orchestrator.get_conversation("c1").await.unwrap();
    assert_eq!(convo.messages().len(), 2);
    assert_eq!(convo.messages()[1].content, "echo: What is a CPL?");
}
