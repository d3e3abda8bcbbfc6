use super::*;

#[tokio::test]
async fn sign_in_matches_registered_credentials() {
    let auth = MemoryAuth::default();
    let alice = auth.register_password("alice@example.com", "pw", Some("Alice"));

    let err = auth
        .sign_in(Credentials::EmailPassword { email: "alice@example.com".into(), password: "nope".into() })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E_AUTH");
    assert_eq!(auth.current_user(), None);

    let user = auth
        .sign_in(Credentials::EmailPassword { email: "alice@example.com".into(), password: "pw".into() })
        .await
        .unwrap();
    assert_eq!(user, alice);
    assert_eq!(auth.current_user().and_then(|u| u.display_name), Some("Alice".to_owned()));
}

#[tokio::test]
async fn watch_observes_sign_out() {
    let auth = MemoryAuth::default();
    auth.register_federated(IdpProvider::Google, "tok", Some("Gina"));
    let mut rx = auth.watch();
    assert_eq!(*rx.borrow_and_update(), None);

    auth.sign_in(Credentials::Federated { provider: IdpProvider::Google, id_token: "tok".into() })
        .await
        .unwrap();
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_some());

    auth.sign_out().await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), None);
}

#[tokio::test]
async fn subscribe_replays_existing_children_then_streams() {
    let store = MemoryMessageStore::default();
    store.insert_remote(Message::text("one", "A"));
    store.insert_remote(Message::text("two", "B"));

    let mut rx = store.subscribe();
    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert!(matches!(first, ChildEvent::Added { ref message, .. } if message.text.as_deref() == Some("one")));
    assert!(matches!(second, ChildEvent::Added { ref message, .. } if message.text.as_deref() == Some("two")));

    let key = store.push(&Message::text("three", "C")).await.unwrap();
    assert_eq!(
        rx.recv().await.unwrap(),
        ChildEvent::Added { key: key.clone(), message: Message::text("three", "C") }
    );

    assert!(store.update(&key, Message::text("3", "C")));
    assert!(matches!(rx.recv().await.unwrap(), ChildEvent::Changed { .. }));
    assert!(store.remove(&key));
    assert_eq!(rx.recv().await.unwrap(), ChildEvent::Removed { key });
}

#[tokio::test]
async fn dropped_receiver_unregisters_listener() {
    let store = MemoryMessageStore::default();
    let rx = store.subscribe();
    assert_eq!(store.listener_count(), 1);
    drop(rx);
    assert_eq!(store.listener_count(), 0);
    assert_eq!(store.subscribe_count(), 1);
}

#[tokio::test]
async fn failed_push_stores_nothing() {
    let store = MemoryMessageStore::default();
    store.fail_pushes(true);
    assert!(store.push(&Message::text("x", "A")).await.is_err());
    assert!(store.messages().is_empty());
}

#[tokio::test]
async fn cancel_all_notifies_and_drops_listeners() {
    let store = MemoryMessageStore::default();
    let mut rx = store.subscribe();
    store.cancel_all("permission_denied");
    assert_eq!(rx.recv().await, Some(ChildEvent::Cancelled { reason: "permission_denied".into() }));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn download_url_requires_prior_upload() {
    let photos = MemoryBlobStore::default();
    assert!(matches!(photos.download_url("chat_photos/a.jpg").await, Err(BackendError::InvalidPath(_))));

    photos
        .put_file("chat_photos/a.jpg", &LocalImage::jpeg("/nonexistent/a.jpg"))
        .await
        .unwrap();
    assert_eq!(photos.download_url("chat_photos/a.jpg").await.unwrap(), "memory://photos/chat_photos/a.jpg");
    assert_eq!(photos.uploads(), vec!["chat_photos/a.jpg".to_owned()]);
    assert_eq!(photos.url_requests(), 2);
}

#[tokio::test]
async fn put_file_records_local_file_size() {
    let path = std::env::temp_dir().join(format!("friendlychat-{}.jpg", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0]).await.unwrap();

    let photos = MemoryBlobStore::default();
    let object = photos.put_file("chat_photos/x.jpg", &LocalImage::jpeg(&path)).await.unwrap();
    let missing = photos
        .put_file("chat_photos/y.jpg", &LocalImage::jpeg("/nonexistent/y.jpg"))
        .await
        .unwrap();
    tokio::fs::remove_file(&path).await.unwrap();

    assert_eq!(object.size, 4);
    assert_eq!(missing.size, 0);
}

#[tokio::test(start_paused = true)]
async fn remote_config_respects_cache_window() {
    let config = MemoryRemoteConfig::default();
    config.set_defaults(HashMap::from([("limit".to_owned(), "1000".to_owned())]));
    config.set_server_value("limit", "280");

    config.fetch(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(config.get_long("limit"), 1000);
    assert!(config.activate());
    assert_eq!(config.get_long("limit"), 280);

    config.set_server_value("limit", "140");
    config.fetch(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(config.network_fetches(), 1, "cached fetch skips the network");
    assert!(!config.activate());

    config.fetch(Duration::ZERO).await.unwrap();
    assert_eq!(config.network_fetches(), 2);
    assert!(config.activate());
    assert_eq!(config.get_long("limit"), 140);
}

#[tokio::test]
async fn remote_config_failure_keeps_defaults() {
    let config = MemoryRemoteConfig::default();
    config.set_defaults(HashMap::from([("limit".to_owned(), "1000".to_owned())]));
    config.fail_fetches(true);
    assert!(config.fetch(Duration::ZERO).await.is_err());
    assert!(!config.activate());
    assert_eq!(config.get_long("limit"), 1000);
}
