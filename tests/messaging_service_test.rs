// 集成测试套件 - 通过 MessagingService 门面验证消息核心的端到端行为
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use campus_chat_core::{
    ChatConfig, ChatError, ErrorHandler, MemoryRealtimeStore, MemoryUploader, Message,
    MessageHandler, MessageStatus, MessagingService, RealtimeStore, RejectingUploader, TypingEntry,
    TypingHandler, UploadFile, UserRef,
};
use serde_json::json;
use tracing::info;

const CHANNEL: &str = "homework-help";

fn ana() -> UserRef {
    UserRef::new("u1", "Ana")
}

fn bo() -> UserRef {
    UserRef::new("u2", "Bo")
}

fn new_service(store: &Arc<MemoryRealtimeStore>) -> Result<MessagingService> {
    Ok(MessagingService::new(
        CHANNEL,
        store.clone(),
        Arc::new(MemoryUploader::new()),
        &ChatConfig::default(),
    )?)
}

/// 订阅投递是异步的，轮询等待直到条件满足
async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn message_sink() -> (MessageHandler, Arc<Mutex<Vec<Message>>>) {
    let sink: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let push = sink.clone();
    let handler: MessageHandler = Arc::new(move |message| push.lock().unwrap().push(message));
    (handler, sink)
}

fn typing_sink() -> (TypingHandler, Arc<Mutex<Vec<Vec<TypingEntry>>>>) {
    let sink: Arc<Mutex<Vec<Vec<TypingEntry>>>> = Arc::new(Mutex::new(Vec::new()));
    let push = sink.clone();
    let handler: TypingHandler = Arc::new(move |entries| push.lock().unwrap().push(entries));
    (handler, sink)
}

fn panic_on_error() -> ErrorHandler {
    Arc::new(|err| panic!("unexpected subscription error: {err}"))
}

#[tokio::test]
async fn test_all_subscribers_observe_the_same_order() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = Arc::new(new_service(&store)?);

    let (first_handler, first_seen) = message_sink();
    let (second_handler, second_seen) = message_sink();
    let _first = service
        .listen_to_messages(first_handler, panic_on_error())
        .await?;
    let _second = service
        .listen_to_messages(second_handler, panic_on_error())
        .await?;

    // 两个并发写入方交错发送
    let writer_a = {
        let service = service.clone();
        tokio::spawn(async move {
            for n in 0..5 {
                service
                    .send_message(&ana(), &format!("from ana {n}"), vec![])
                    .await
                    .expect("send");
            }
        })
    };
    let writer_b = {
        let service = service.clone();
        tokio::spawn(async move {
            for n in 0..5 {
                service
                    .send_message(&bo(), &format!("from bo {n}"), vec![])
                    .await
                    .expect("send");
            }
        })
    };
    writer_a.await?;
    writer_b.await?;

    let probe = first_seen.clone();
    wait_until("first subscriber to see 10 messages", move || {
        probe.lock().unwrap().len() == 10
    })
    .await;
    let probe = second_seen.clone();
    wait_until("second subscriber to see 10 messages", move || {
        probe.lock().unwrap().len() == 10
    })
    .await;

    let stored: Vec<String> = service
        .get_all_messages()
        .await?
        .into_iter()
        .map(|m| m.id)
        .collect();
    let first_ids: Vec<String> = first_seen.lock().unwrap().iter().map(|m| m.id.clone()).collect();
    let second_ids: Vec<String> = second_seen.lock().unwrap().iter().map(|m| m.id.clone()).collect();

    info!(total = stored.len(), "all subscribers caught up");
    assert_eq!(first_ids, stored, "subscriber order must match store order");
    assert_eq!(first_ids, second_ids, "subscribers must agree on order");
    Ok(())
}

#[tokio::test]
async fn test_replay_then_live_delivery_is_exactly_once() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = new_service(&store)?;

    let mut expected = Vec::new();
    for n in 0..3 {
        expected.push(service.send_message(&ana(), &format!("early {n}"), vec![]).await?);
    }

    let (handler, seen) = message_sink();
    let _subscription = service.listen_to_messages(handler, panic_on_error()).await?;

    let file = UploadFile::new("scan.png", "image/png", Bytes::from_static(b"png bytes"));
    expected.push(service.send_message(&bo(), "late with file", vec![file]).await?);
    expected.push(service.send_message(&ana(), "last", vec![]).await?);

    let probe = seen.clone();
    wait_until("subscriber to see replay plus live messages", move || {
        probe.lock().unwrap().len() == 5
    })
    .await;

    let received = seen.lock().unwrap().clone();
    let ids: Vec<String> = received.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, expected, "replay then live, in order, no duplicates");

    // 附件元数据随消息完整到达
    let with_file = &received[3];
    assert_eq!(with_file.attachments.len(), 1);
    assert_eq!(with_file.attachments[0].name, "scan.png");
    assert!(with_file.attachments[0].url.starts_with("mem://"));
    assert_eq!(with_file.status, MessageStatus::Sent);
    Ok(())
}

#[tokio::test]
async fn test_pagination_walks_back_without_gaps_or_overlap() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = new_service(&store)?;

    let mut keys = Vec::new();
    for n in 0..9 {
        keys.push(service.send_message(&ana(), &format!("m{n}"), vec![]).await?);
    }

    let page1 = service.get_messages_before(&keys[8], 4).await?;
    let page1_ids: Vec<&str> = page1.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(page1_ids, keys[4..8].iter().map(String::as_str).collect::<Vec<_>>());

    let page2 = service.get_messages_before(&page1[0].id, 4).await?;
    let page2_ids: Vec<&str> = page2.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(page2_ids, keys[0..4].iter().map(String::as_str).collect::<Vec<_>>());

    // 走到头之后是空页
    let page3 = service.get_messages_before(&page2[0].id, 4).await?;
    assert!(page3.is_empty());

    // 同一游标重复查询结果一致
    let again = service.get_messages_before(&keys[8], 4).await?;
    assert_eq!(
        again.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        page1_ids
    );

    // 未知游标视为没有更早的消息
    let nowhere = service.get_messages_before("01UNKNOWNCURSOR", 4).await?;
    assert!(nowhere.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_page_limit_is_clamped_to_configuration() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let mut config = ChatConfig::default();
    config.messaging.page_size_limit = 2;
    let service = MessagingService::new(
        CHANNEL,
        store.clone(),
        Arc::new(MemoryUploader::new()),
        &config,
    )?;

    let mut keys = Vec::new();
    for n in 0..6 {
        keys.push(service.send_message(&ana(), &format!("m{n}"), vec![]).await?);
    }

    let page = service.get_messages_before(&keys[5], 50).await?;
    assert_eq!(page.len(), 2, "limit above the configured cap is clamped");
    assert_eq!(page[0].id, keys[3]);
    assert_eq!(page[1].id, keys[4]);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_reactions_from_different_users_are_merged() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = new_service(&store)?;
    let key = service.send_message(&ana(), "react to me", vec![]).await?;

    let ana_user = ana();
    let bo_user = bo();
    let (left, right) = tokio::join!(
        service.add_reaction(&key, "🎉", &ana_user),
        service.add_reaction(&key, "🎉", &bo_user),
    );
    left?;
    right?;

    let message = service
        .get_all_messages()
        .await?
        .into_iter()
        .find(|m| m.id == key)
        .expect("message exists");
    let users = message.reaction_users("🎉");
    let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "u2"], "neither concurrent reaction is lost");
    Ok(())
}

#[tokio::test]
async fn test_duplicate_reaction_is_a_silent_no_op() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = new_service(&store)?;
    let key = service.send_message(&ana(), "react to me", vec![]).await?;

    let first = service.add_reaction(&key, "👍", &ana()).await?;
    let writes_after_first = store.stats().leaf_writes;
    let second = service.add_reaction(&key, "👍", &ana()).await?;

    assert_eq!(first, second);
    assert_eq!(
        store.stats().leaf_writes,
        writes_after_first,
        "repeated reaction must not issue a store write"
    );

    // 移除不存在的回应同样不产生写入
    let _ = service.remove_reaction(&key, "👍", &ana()).await?;
    let writes_after_remove = store.stats().leaf_writes;
    let map = service.remove_reaction(&key, "👍", &ana()).await?;
    assert!(map.is_empty());
    assert_eq!(store.stats().leaf_writes, writes_after_remove);
    Ok(())
}

#[tokio::test]
async fn test_reacting_to_a_missing_message_fails() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = new_service(&store)?;

    let err = service
        .add_reaction("01NOSUCHMESSAGE", "👍", &ana())
        .await
        .expect_err("reaction must fail for a missing message");
    assert!(err.is_not_found());
    Ok(())
}

#[tokio::test]
async fn test_typing_indicator_expires_without_explicit_clear() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let mut config = ChatConfig::default();
    config.messaging.typing_ttl_seconds = 1;
    config.messaging.typing_sweep_interval_ms = 100;
    let service = MessagingService::new(
        CHANNEL,
        store.clone(),
        Arc::new(MemoryUploader::new()),
        &config,
    )?;

    let (handler, emissions) = typing_sink();
    let _subscription = service
        .listen_to_typing_indicators(handler, panic_on_error())
        .await?;

    service.send_typing_indicator(&ana()).await?;
    let probe = emissions.clone();
    wait_until("typing set to contain ana", move || {
        probe
            .lock()
            .unwrap()
            .last()
            .is_some_and(|set| set.iter().any(|e| e.id == "u1"))
    })
    .await;

    // 不调用 clear，等待超时淘汰
    let probe = emissions.clone();
    wait_until("typing set to drain after the ttl", move || {
        probe.lock().unwrap().last().is_some_and(Vec::is_empty)
    })
    .await;
    info!("abandoned typing entry expired on its own");
    Ok(())
}

#[tokio::test]
async fn test_clearing_typing_removes_user_immediately() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let mut config = ChatConfig::default();
    config.messaging.typing_sweep_interval_ms = 100;
    let service = MessagingService::new(
        CHANNEL,
        store.clone(),
        Arc::new(MemoryUploader::new()),
        &config,
    )?;

    let (handler, emissions) = typing_sink();
    let _subscription = service
        .listen_to_typing_indicators(handler, panic_on_error())
        .await?;

    service.send_typing_indicator(&ana()).await?;
    service.send_typing_indicator(&bo()).await?;
    let probe = emissions.clone();
    wait_until("both users to be typing", move || {
        probe.lock().unwrap().last().is_some_and(|set| set.len() == 2)
    })
    .await;

    service.clear_typing_indicator(&ana()).await?;
    let probe = emissions.clone();
    wait_until("only bo to remain typing", move || {
        probe
            .lock()
            .unwrap()
            .last()
            .is_some_and(|set| set.len() == 1 && set[0].id == "u2")
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn test_mark_read_transitions_everything_in_one_batch() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = new_service(&store)?;

    let k1 = service.send_message(&ana(), "a", vec![]).await?;
    service.send_message(&bo(), "b", vec![]).await?;
    service.send_message(&ana(), "c", vec![]).await?;
    // 其中一条先行确认为已投递
    assert!(service.acknowledge_delivery(&k1).await?);

    assert_eq!(service.mark_messages_as_read().await?, 3);
    assert_eq!(store.stats().batch_writes, 1, "a single batch write");
    for message in service.get_all_messages().await? {
        assert_eq!(message.status, MessageStatus::Read);
    }

    // 全已读频道上的重复调用不产生写入
    assert_eq!(service.mark_messages_as_read().await?, 0);
    assert_eq!(store.stats().batch_writes, 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_upload_leaves_no_trace() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let uploader = Arc::new(RejectingUploader::new(1));
    let service = MessagingService::new(
        CHANNEL,
        store.clone(),
        uploader.clone(),
        &ChatConfig::default(),
    )?;

    let files = vec![
        UploadFile::new("ok.png", "image/png", Bytes::from_static(b"first")),
        UploadFile::new("bad.png", "image/png", Bytes::from_static(b"second")),
    ];
    let err = service
        .send_message(&ana(), "with files", files)
        .await
        .expect_err("second upload is rejected");
    assert!(matches!(err, ChatError::Upload(_)));
    assert!(uploader.attempts() >= 2);

    assert!(service.get_all_messages().await?.is_empty());
    assert_eq!(store.stats().creates, 0, "an aborted send writes nothing");
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = new_service(&store)?;

    let (handler, seen) = message_sink();
    let subscription = service.listen_to_messages(handler, panic_on_error()).await?;

    service.send_message(&ana(), "before", vec![]).await?;
    let probe = seen.clone();
    wait_until("first message to arrive", move || {
        probe.lock().unwrap().len() == 1
    })
    .await;

    subscription.unsubscribe();
    service.send_message(&ana(), "after", vec![]).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().unwrap().len(), 1, "no delivery after unsubscribe");
    Ok(())
}

#[tokio::test]
async fn test_corrupt_record_surfaces_error_and_ends_subscription() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let store = Arc::new(MemoryRealtimeStore::new());
    let service = new_service(&store)?;

    let (handler, seen) = message_sink();
    let errors = Arc::new(AtomicUsize::new(0));
    let error_count = errors.clone();
    let on_error: ErrorHandler = Arc::new(move |err| {
        info!(error = %err, "subscription reported an error");
        error_count.fetch_add(1, Ordering::SeqCst);
    });
    let _subscription = service.listen_to_messages(handler, on_error).await?;

    service.send_message(&ana(), "fine", vec![]).await?;
    let probe = seen.clone();
    wait_until("the healthy message to arrive", move || {
        probe.lock().unwrap().len() == 1
    })
    .await;

    // 直接向存储注入一条无法解析的记录
    store
        .update_leaf(&format!("messages/{CHANNEL}/zzzz-corrupt"), json!("not a message"))
        .await?;
    let probe = errors.clone();
    wait_until("the decode failure to surface", move || {
        probe.load(Ordering::SeqCst) == 1
    })
    .await;

    // 订阅已死：后续消息不再投递，错误也不再重复上报
    service.send_message(&ana(), "unseen", vec![]).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(
        service.metrics().subscription_errors_total.get(),
        1,
        "delivery failures are counted"
    );
    Ok(())
}
