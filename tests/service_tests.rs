//! SceneService and TCP front end tests
#![cfg(feature = "server")]

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use scene_sync::config::ServerConfig;
    use scene_sync::identity::ClientId;
    use scene_sync::message::SceneMessage;
    use scene_sync::protocol::{ClientRequest, ServerMessage};
    use scene_sync::server::SceneServer;
    use scene_sync::service::SceneService;
    use scene_sync::types::{Entity, EntityKind};
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    fn make_service(max_range: u64) -> SceneService {
        SceneService::new(ServerConfig {
            max_range,
            ..Default::default()
        })
    }

    fn create(id: &str) -> SceneMessage {
        SceneMessage::Create {
            entities: vec![Entity::new(id, EntityKind::Cube)],
        }
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    #[test]
    fn new_participant_gets_id_and_avatar() {
        let mut svc = make_service(100);
        assert_eq!(svc.session_count(), 0);

        let welcome = svc.reconnect(None);
        assert!(!welcome.resumed);
        assert_eq!(welcome.avatar_id, format!("avatar-{}", welcome.client_id));
        assert_eq!(svc.session_count(), 1);

        let avatar = svc.log().state().get(&welcome.avatar_id).unwrap();
        assert_eq!(avatar.kind, EntityKind::Avatar);
        assert_eq!(svc.log().head(), 1);
    }

    #[test]
    fn known_participant_resumes_without_second_avatar() {
        let mut svc = make_service(100);
        let first = svc.reconnect(None);
        svc.disconnect(&first.client_id);
        assert_eq!(svc.connected_count(), 0);

        let second = svc.reconnect(Some(first.client_id.clone()));
        assert!(second.resumed);
        assert_eq!(second.avatar_id, first.avatar_id);
        assert_eq!(svc.connected_count(), 1);
        assert_eq!(svc.log().head(), 1);
    }

    #[test]
    fn resumed_participant_gets_avatar_back_after_clear() {
        let mut svc = make_service(100);
        let first = svc.reconnect(None);
        svc.submit(SceneMessage::Clear).unwrap();
        assert!(!svc.log().state().contains(&first.avatar_id));

        svc.reconnect(Some(first.client_id));
        assert!(svc.log().state().contains(&first.avatar_id));
    }

    #[test]
    fn unknown_participant_id_is_replaced() {
        let mut svc = make_service(100);
        let welcome = svc.reconnect(Some(ClientId("stale".into())));
        assert!(!welcome.resumed);
        assert_ne!(welcome.client_id.as_str(), "stale");
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    #[test]
    fn stats_reflect_initial_state() {
        let svc = make_service(100);
        let stats = svc.stats();
        assert_eq!(stats.log_size, 0);
        assert_eq!(stats.head_seq, 0);
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.entities, 0);
    }

    // -----------------------------------------------------------------------
    // Request handling
    // -----------------------------------------------------------------------

    #[test]
    fn submit_is_pushed_to_subscribers() {
        let mut svc = make_service(100);
        let mut rx = svc.subscribe();

        let reply = svc.handle(ClientRequest::Submit {
            message: create("a"),
        });
        assert_eq!(reply, ServerMessage::Submitted { seq_num: 1 });
        assert_eq!(rx.try_recv().unwrap().seq_num, 1);
    }

    #[test]
    fn full_sync_carries_matching_digest() {
        let mut svc = make_service(100);
        svc.submit(create("a")).unwrap();
        let ServerMessage::FullSync(reply) = svc.handle(ClientRequest::FullSync) else {
            panic!("expected full_sync reply");
        };
        assert_eq!(reply.head_seq, 1);
        assert_eq!(reply.digest, reply.snapshot.digest());
    }

    #[test]
    fn missing_range_is_bounded() {
        let mut svc = make_service(3);
        for id in ["a", "b", "c", "d", "e"] {
            svc.submit(create(id)).unwrap();
        }

        let reply = svc.handle(ClientRequest::MissingRange { from: 2, to: 5 });
        let ServerMessage::Operations { operations } = reply else {
            panic!("expected operations reply");
        };
        let seqs: Vec<_> = operations.iter().map(|o| o.seq_num).collect();
        assert_eq!(seqs, vec![2, 3, 4]);

        let reply = svc.handle(ClientRequest::MissingRange { from: 1, to: 6 });
        assert!(matches!(reply, ServerMessage::Error { .. }));
    }

    #[test]
    fn rejected_submit_is_an_error_reply() {
        let mut svc = make_service(100);
        let reply = svc.handle(ClientRequest::Submit {
            message: SceneMessage::SetTemperature {
                temperature: f32::INFINITY,
            },
        });
        assert!(matches!(reply, ServerMessage::Error { .. }));
        assert_eq!(svc.log().head(), 0);
    }

    // -----------------------------------------------------------------------
    // TCP front end
    // -----------------------------------------------------------------------

    async fn send(stream: &mut TcpStream, request: &ClientRequest) {
        let mut line = serde_json::to_vec(request).unwrap();
        line.push(b'\n');
        stream.write_all(&line).await.unwrap();
    }

    #[tokio::test]
    async fn tcp_session_round_trip() {
        let service = Arc::new(Mutex::new(make_service(100)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = SceneServer::new(ServerConfig::default(), service.clone());
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_until(listener, async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, &ClientRequest::Reconnect { client_id: None }).await;
        let (reader, mut writer) = stream.split();
        let mut lines = BufReader::new(reader).lines();

        let welcome = ServerMessage::decode(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let ServerMessage::Welcome(welcome) = welcome else {
            panic!("expected welcome, got {:?}", welcome);
        };

        writer.write_all(b"{\"type\":\"nonsense\"}\n").await.unwrap();
        let reply = ServerMessage::decode(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, ServerMessage::Error { .. }));

        // Sequenced by someone else: arrives as a push.
        service.lock().submit(create("pushed")).unwrap();
        let push = ServerMessage::decode(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let ServerMessage::Operation { operation } = push else {
            panic!("expected operation push, got {:?}", push);
        };
        assert_eq!(operation.seq_num, 2);

        drop(lines);
        drop(writer);
        drop(stream);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(service.lock().connected_count(), 0);
        assert_eq!(service.lock().session_count(), 1);
        assert!(service.lock().log().state().contains(&welcome.avatar_id));

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
