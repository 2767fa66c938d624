use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::mock::{FakeNotificationApi, MockConnector, ServerEnd, config, eventually, notification};
use crate::config::Session;
use crate::error::ChatError;
use crate::notifications::NotificationStream;
use crate::receiver::NotificationEvent;

struct Started {
    stream: NotificationStream,
    server: ServerEnd,
    connector: Arc<MockConnector>,
    api: Arc<FakeNotificationApi>,
}

/// Start a stream, authenticate and wait for the first reconciliation
async fn started(api: Arc<FakeNotificationApi>) -> Started {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let stream =
        NotificationStream::start(&config(), &Session::new("token-1"), connector.clone(), api.clone())
            .unwrap();

    server.handshake(1).await;
    server.expect("request_unread_count").await;

    eventually(|| api.list_calls() == 1 && api.unread_calls() == 2).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    Started {
        stream,
        server,
        connector,
        api,
    }
}

fn ids(stream: &NotificationStream) -> Vec<u64> {
    stream.notifications().iter().map(|n| n.id).collect()
}

#[tokio::test]
async fn test_empty_token_is_rejected() {
    let connector = MockConnector::new();

    let result = NotificationStream::start(
        &config(),
        &Session::new("  "),
        connector.clone(),
        FakeNotificationApi::with(vec![]),
    );

    assert!(matches!(result, Err(ChatError::Auth(_))));
    tokio::task::yield_now().await;
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_startup_fetches_list_and_count() {
    let api = FakeNotificationApi::with(vec![notification(2, false), notification(1, true)]);
    let Started { stream, .. } = started(api).await;

    assert_eq!(ids(&stream), vec![2, 1]);
    eventually(|| stream.unread_count() == 1).await;
    assert!(stream.status().is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_push_prepends_and_counts() {
    let api = FakeNotificationApi::with(vec![notification(2, false), notification(1, true)]);
    let Started { stream, server, .. } = started(api).await;
    eventually(|| stream.unread_count() == 1).await;

    let mut events = stream.events();
    server.emit(
        "new_notification",
        json!({ "id": 3, "message": "Shift starts soon", "type": "event_reminder", "read": false }),
    );

    match events.next().await {
        Some(NotificationEvent::NotificationReceived(n)) => assert_eq!(n.id, 3),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(
        events.next().await,
        Some(NotificationEvent::UnreadCountChanged(2))
    ));
    assert_eq!(ids(&stream), vec![3, 2, 1]);
    assert_eq!(stream.unread_count(), 2);

    // Same id again changes nothing
    server.emit("new_notification", json!({ "id": 3, "message": "Shift starts soon" }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ids(&stream), vec![3, 2, 1]);
    assert_eq!(stream.unread_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_server_count_overwrites_local() {
    let api = FakeNotificationApi::with(vec![notification(1, false)]);
    let Started { stream, server, .. } = started(api).await;
    eventually(|| stream.unread_count() == 1).await;

    server.emit("unread_count_update", json!({ "count": 7 }));
    eventually(|| stream.unread_count() == 7).await;

    server.emit("unread_count_update", json!({ "unread_count": 0 }));
    eventually(|| stream.unread_count() == 0).await;
    assert_eq!(ids(&stream), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_unread_count_is_polled() {
    let api = FakeNotificationApi::with(vec![]);
    let Started { stream, api, .. } = started(api).await;
    assert_eq!(api.unread_calls(), 2);

    api.set_unread(5);
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(api.unread_calls(), 3);
    assert_eq!(stream.unread_count(), 5);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.unread_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_mark_as_read() {
    let api = FakeNotificationApi::with(vec![notification(2, false), notification(1, false)]);
    let Started { stream, api, .. } = started(api).await;
    eventually(|| stream.unread_count() == 2).await;

    stream.mark_as_read(1).await.unwrap();

    assert_eq!(api.marked(), vec![1]);
    assert_eq!(stream.unread_count(), 1);
    assert!(stream.notifications()[1].read);
    assert!(!stream.notifications()[0].read);

    // Already read: nothing changes locally
    stream.mark_as_read(1).await.unwrap();
    assert_eq!(stream.unread_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mark_is_reconciled_from_server() {
    let api = FakeNotificationApi::with(vec![notification(2, false), notification(1, false)]);
    let Started { stream, api, .. } = started(api).await;
    eventually(|| stream.unread_count() == 2).await;

    let mut events = stream.events();
    api.set_failing_marks(true);

    assert!(matches!(stream.mark_as_read(1).await, Err(ChatError::Request(_))));

    // Applied locally first
    assert!(matches!(
        events.next().await,
        Some(NotificationEvent::UnreadCountChanged(1))
    ));

    eventually(|| api.list_calls() == 2).await;
    eventually(|| stream.unread_count() == 2).await;
    eventually(|| stream.notifications().iter().all(|n| !n.read)).await;
    assert!(api.marked().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mark_all_as_read() {
    let api = FakeNotificationApi::with(vec![
        notification(3, false),
        notification(2, true),
        notification(1, false),
    ]);
    let Started { stream, api, .. } = started(api).await;
    eventually(|| stream.unread_count() == 2).await;

    stream.mark_all_as_read().await.unwrap();
    assert_eq!(stream.unread_count(), 0);
    assert!(stream.notifications().iter().all(|n| n.read));

    api.set_failing_marks(true);
    api.set_unread(1);
    assert!(stream.mark_all_as_read().await.is_err());
    eventually(|| stream.unread_count() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_notification() {
    let api = FakeNotificationApi::with(vec![notification(2, false), notification(1, true)]);
    let Started { stream, api, .. } = started(api).await;
    eventually(|| stream.unread_count() == 1).await;

    stream.delete_notification(1).await.unwrap();
    assert_eq!(ids(&stream), vec![2]);
    assert_eq!(stream.unread_count(), 1);

    stream.delete_notification(2).await.unwrap();
    assert!(stream.notifications().is_empty());
    assert_eq!(stream.unread_count(), 0);
    assert_eq!(api.deleted(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_unread_only_page() {
    let api = FakeNotificationApi::with(vec![
        notification(3, false),
        notification(2, true),
        notification(1, false),
    ]);
    let Started { stream, .. } = started(api).await;

    let page = stream.fetch_notifications(1, true).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(ids(&stream), vec![3, 1]);

    stream.refresh().await.unwrap();
    assert_eq!(ids(&stream), vec![3, 2, 1]);
    assert_eq!(stream.unread_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_club_rooms_survive_reconnect() {
    let api = FakeNotificationApi::with(vec![]);
    let Started {
        stream,
        mut server,
        connector,
        ..
    } = started(api).await;

    stream.join_club_room(7).unwrap();
    let join = server.expect("join_club_room").await;
    assert_eq!(join["data"], json!({ "club_id": 7 }));

    stream.join_club_room(8).unwrap();
    server.expect("join_club_room").await;
    stream.leave_club_room(8).unwrap();
    let leave = server.expect("leave_club_room").await;
    assert_eq!(leave["data"], json!({ "club_id": 8 }));

    let mut second = connector.accept();
    server.hang_up();

    second.handshake(1).await;
    second.expect("request_unread_count").await;
    let rejoin = second.expect("join_club_room").await;
    assert_eq!(rejoin["data"], json!({ "club_id": 7 }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(second.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_club_notification_event() {
    let api = FakeNotificationApi::with(vec![]);
    let Started { stream, server, .. } = started(api).await;
    let mut events = stream.events();

    server.emit("club_notification", json!({ "club_id": 7, "message": "Meeting moved" }));

    match events.next().await {
        Some(NotificationEvent::ClubNotification(payload)) => {
            assert_eq!(payload["message"], "Meeting moved");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_everything() {
    let api = FakeNotificationApi::with(vec![]);
    let Started {
        stream,
        mut server,
        api,
        ..
    } = started(api).await;
    let mut events = stream.events();

    stream.close().await;
    assert!(server.next().await.is_none());
    assert!(events.next().await.is_none());

    let polls = api.unread_calls();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(api.unread_calls(), polls);

    stream.close().await;
    assert!(stream.is_closed());
    assert_eq!(stream.join_club_room(1), Err(ChatError::Closed));
}
