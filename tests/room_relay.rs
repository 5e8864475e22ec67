//! A hub and two spokes on loopback exchanging real datagrams

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use room_relay::audio::SyntheticMicrophone;
use room_relay::directory::StaticDirectory;
use room_relay::relay::SessionRole;
use room_relay::session::{SessionEvent, SessionState};
use room_relay::video::{SharedCamera, SyntheticCamera};

fn room() -> Arc<StaticDirectory> {
    Arc::new(StaticDirectory::with_room(
        ROOM,
        vec![endpoint(HUB), endpoint("alice"), endpoint("bob")],
    ))
}

async fn stop_all(participants: &[&Participant]) {
    for participant in participants {
        participant.session.stop().await;
        assert_eq!(participant.session.state(), SessionState::Stopped);
    }
}

#[tokio::test]
async fn test_chat_relayed_through_hub() {
    let directory = room();
    let mut hub = Participant::start(builder(&directory, HUB, test_config())).await;
    let mut alice = Participant::start(builder(&directory, "alice", test_config())).await;
    let mut bob = Participant::start(builder(&directory, "bob", test_config())).await;
    assert_eq!(hub.session.role(), SessionRole::Hub);
    assert_eq!(alice.session.role(), SessionRole::Spoke);

    let sent = alice.session.send_chat_text("hello room").await.unwrap();
    assert_eq!(sent, 1);

    let is_text = |e: &SessionEvent| matches!(e, SessionEvent::ChatText { .. });
    for participant in [&mut hub, &mut bob] {
        match participant.expect(is_text).await {
            SessionEvent::ChatText { sender_id, text } => {
                assert_eq!(sender_id, "alice");
                assert_eq!(text, "hello room");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    // The origin never gets its own message back
    let echoed = alice.drain_for(Duration::from_millis(300)).await;
    assert!(!echoed.iter().any(is_text));

    let stats = hub.session.stats();
    assert!(stats.sender.packets_forwarded >= 1);
    stop_all(&[&hub, &alice, &bob]).await;
}

#[tokio::test]
async fn test_hub_chat_reaches_every_spoke() {
    let directory = room();
    let hub = Participant::start(builder(&directory, HUB, test_config())).await;
    let mut alice = Participant::start(builder(&directory, "alice", test_config())).await;
    let mut bob = Participant::start(builder(&directory, "bob", test_config())).await;

    assert_eq!(hub.session.send_chat_text("exam starts now").await.unwrap(), 2);

    for participant in [&mut alice, &mut bob] {
        let event = participant
            .expect(|e| matches!(e, SessionEvent::ChatText { .. }))
            .await;
        assert!(matches!(event, SessionEvent::ChatText { ref sender_id, .. } if sender_id == HUB));
    }
    stop_all(&[&hub, &alice, &bob]).await;
}

#[tokio::test]
async fn test_file_transfer_through_hub() {
    let directory = room();
    let mut app = test_config();
    app.protocol.file_chunk_size = 51_200;

    let mut hub = Participant::start(builder(&directory, HUB, app.clone())).await;
    let alice = Participant::start(builder(&directory, "alice", app.clone())).await;
    let mut bob = Participant::start(builder(&directory, "bob", app)).await;

    let report: Vec<u8> = (0..204_800u32).map(|i| (i % 251) as u8).collect();
    let messages = alice.session.send_file("report.pdf", &report).await.unwrap();
    // FILE_START, four chunks, FILE_END
    assert_eq!(messages, 6);

    for participant in [&mut hub, &mut bob] {
        match participant
            .expect(|e| matches!(e, SessionEvent::FileReceived { .. }))
            .await
        {
            SessionEvent::FileReceived {
                sender_id,
                file_name,
                data,
            } => {
                assert_eq!(sender_id, "alice");
                assert_eq!(file_name, "report.pdf");
                assert_eq!(data.as_ref(), report.as_slice());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    // Completion is reported once per file
    let extra = bob.drain_for(Duration::from_millis(300)).await;
    assert!(!extra
        .iter()
        .any(|e| matches!(e, SessionEvent::FileReceived { .. })));
    assert_eq!(bob.session.stats().files_completed, 1);
    stop_all(&[&hub, &alice, &bob]).await;
}

#[tokio::test]
async fn test_audio_relayed_and_played_per_sender() {
    let directory = room();
    let hub_output = RecordingOutput::default();
    let bob_output = RecordingOutput::default();

    let hub = Participant::start(
        builder(&directory, HUB, test_config()).audio_output(Arc::new(hub_output.clone())),
    )
    .await;
    let alice = Participant::start(
        builder(&directory, "alice", test_config()).microphone(Arc::new(SyntheticMicrophone::new())),
    )
    .await;
    let bob = Participant::start(
        builder(&directory, "bob", test_config()).audio_output(Arc::new(bob_output.clone())),
    )
    .await;

    wait_until(|| hub_output.count_from("alice") >= 3 && bob_output.count_from("alice") >= 3).await;

    let buffer_len = test_config().audio.bytes_per_buffer();
    assert!(bob_output
        .written
        .lock()
        .iter()
        .all(|(_, pcm)| pcm.len() == buffer_len));
    assert_eq!(bob.session.stats().playback_senders, 1);
    stop_all(&[&hub, &alice, &bob]).await;
}

#[tokio::test]
async fn test_muted_microphone_sends_nothing() {
    let directory = room();
    let hub_output = RecordingOutput::default();

    let hub = Participant::start(
        builder(&directory, HUB, test_config()).audio_output(Arc::new(hub_output.clone())),
    )
    .await;
    let alice = Participant::start(
        builder(&directory, "alice", test_config()).microphone(Arc::new(SyntheticMicrophone::new())),
    )
    .await;

    wait_until(|| hub_output.count_from("alice") >= 1).await;
    alice.session.set_microphone_mute(true);
    assert!(alice.session.is_microphone_muted());

    // Let in-flight buffers land before counting
    tokio::time::sleep(Duration::from_millis(150)).await;
    let before = hub_output.count_from("alice");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hub_output.count_from("alice"), before);
    assert!(alice.session.stats().audio_buffers_suppressed > 0);

    alice.session.set_microphone_mute(false);
    wait_until(|| hub_output.count_from("alice") > before).await;
    stop_all(&[&hub, &alice]).await;
}

#[tokio::test]
async fn test_mute_discards_queued_buffers() {
    let directory = room();
    let hub = Participant::start(builder(&directory, HUB, test_config())).await;
    // Unpaced capture keeps the send queue full
    let alice = Participant::start(
        builder(&directory, "alice", test_config()).microphone(Arc::new(SyntheticMicrophone::new().unpaced())),
    )
    .await;

    wait_until(|| alice.session.stats().sender.packets_sent >= 20).await;
    alice.session.set_microphone_mute(true);
    let at_mute = alice.session.stats().sender.packets_sent;

    tokio::time::sleep(Duration::from_millis(200)).await;
    // At most the buffer already being sent when the mute landed
    assert!(alice.session.stats().sender.packets_sent <= at_mute + 1);
    stop_all(&[&hub, &alice]).await;
}

#[tokio::test]
async fn test_video_relayed_through_hub() {
    let directory = room();
    let app = test_config();
    let camera = SharedCamera::new(
        Arc::new(SyntheticCamera::new()),
        app.video.clone(),
        app.session.stop_timeout(),
    );

    let mut hub = Participant::start(builder(&directory, HUB, app.clone())).await;
    let mut alice = Participant::start(builder(&directory, "alice", app.clone()).camera(camera.clone())).await;
    let mut bob = Participant::start(builder(&directory, "bob", app.clone())).await;
    assert!(alice.session.is_camera_active());

    alice
        .expect(|e| matches!(e, SessionEvent::LocalPreview { .. }))
        .await;
    for participant in [&mut hub, &mut bob] {
        match participant
            .expect(|e| matches!(e, SessionEvent::VideoFrame { .. }))
            .await
        {
            SessionEvent::VideoFrame { sender_id, image, .. } => {
                assert_eq!(sender_id, "alice");
                assert_eq!((image.width(), image.height()), (app.video.width, app.video.height));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    stop_all(&[&hub, &alice, &bob]).await;
    assert_eq!(camera.lease_count(), 0);
    assert!(!camera.is_capturing());
}

#[tokio::test]
async fn test_chat_and_file_survive_a_stalled_consumer() {
    let directory = room();
    let mut app = test_config();
    app.video.fps = 30;
    let camera = SharedCamera::new(
        Arc::new(SyntheticCamera::new()),
        app.video.clone(),
        app.session.stop_timeout(),
    );

    let mut hub = Participant::start_with_capacity(builder(&directory, HUB, app.clone()), 32).await;
    let alice = Participant::start(builder(&directory, "alice", app.clone()).camera(camera)).await;
    let bob = Participant::start(builder(&directory, "bob", app)).await;

    // Nobody reads the hub's events until video has filled its channel
    wait_until(|| hub.session.stats().events_dropped > 0).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let notes: Vec<u8> = (0..10_240u32).map(|i| (i % 253) as u8).collect();
    alice.session.send_file("notes.bin", &notes).await.unwrap();
    alice.session.send_chat_text("still there?").await.unwrap();
    wait_until(|| hub.session.stats().files_completed == 1).await;

    let mut file = None;
    let mut chat = None;
    tokio::time::timeout(Duration::from_secs(5), async {
        while file.is_none() || chat.is_none() {
            match hub.events.recv().await.expect("event channel closed") {
                SessionEvent::FileReceived { file_name, data, .. } => file = Some((file_name, data)),
                SessionEvent::ChatText { text, .. } => chat = Some(text),
                _ => {}
            }
        }
    })
    .await
    .expect("chat or file lost behind video frames");

    let (file_name, data) = file.unwrap();
    assert_eq!(file_name, "notes.bin");
    assert_eq!(data.as_ref(), notes.as_slice());
    assert_eq!(chat.as_deref(), Some("still there?"));
    assert!(hub.session.stats().events_dropped > 0);
    stop_all(&[&hub, &alice, &bob]).await;
}

#[tokio::test]
async fn test_spoke_notified_when_hub_departs() {
    let directory = room();
    let hub = Participant::start(builder(&directory, HUB, test_config())).await;
    let mut alice = Participant::start(builder(&directory, "alice", test_config())).await;

    hub.session.stop().await;
    directory.remove(ROOM, HUB);

    match alice
        .expect(|e| matches!(e, SessionEvent::HubDeparted { .. }))
        .await
    {
        SessionEvent::HubDeparted { hub_id } => assert_eq!(hub_id, HUB),
        other => panic!("unexpected event {:?}", other),
    }

    // Reported once, and the session stays up
    let later = alice.drain_for(Duration::from_millis(300)).await;
    assert!(!later
        .iter()
        .any(|e| matches!(e, SessionEvent::HubDeparted { .. })));
    assert!(alice.session.is_active());
    alice.session.stop().await;
}

#[tokio::test]
async fn test_stopped_session_releases_ports() {
    let directory = room();
    let first = Participant::start(builder(&directory, "alice", test_config())).await;
    first.session.stop().await;

    // Same endpoint, new session: the ports must be free again
    let second = Participant::start(builder(&directory, "alice", test_config())).await;
    assert!(second.session.is_active());
    second.session.stop().await;
}
