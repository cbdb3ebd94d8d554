use super::*;
use tempfile::tempdir;

#[test]
fn brightness_classifies_backgrounds() {
    assert_eq!(background_brightness("#666666"), Some(102));
    assert!(!ChatSettings::default().is_light_background());
    let light = ChatSettings {
        bg_color: "#b8d4e8".into(),
        ..ChatSettings::default()
    };
    assert!(light.is_light_background());
    assert_eq!(background_brightness("666666"), None);
    assert_eq!(background_brightness("#zzzzzz"), None);
}

#[test]
fn font_weights_map_to_numeric_values() {
    assert_eq!(font_weight_value("thin"), 300);
    assert_eq!(font_weight_value("normal"), 400);
    assert_eq!(font_weight_value("bold"), 600);
    assert_eq!(font_weight_value("heavy"), 400);
}

#[test]
fn blob_uses_camel_case_and_fills_missing_fields() {
    let partial: ChatSettings =
        serde_json::from_str(r##"{"bgColor":"#3d4a6b","fontSize":16}"##).expect("decode");
    assert_eq!(partial.bg_color, "#3d4a6b");
    assert_eq!(partial.font_size, 16);
    assert_eq!(partial.bg_opacity, 100);
    assert!(partial.notification_enabled);

    let encoded = serde_json::to_value(&partial).expect("encode");
    assert_eq!(encoded["notificationEnabled"], true);
    assert_eq!(encoded["autoLogin"], false);
}

#[tokio::test]
async fn saved_settings_reload_identically() {
    let dir = tempdir().expect("tempdir");
    let store = SettingsStore::in_dir(dir.path().join("nested"));
    let settings = ChatSettings {
        bg_color: "#a8d5ba".into(),
        bg_opacity: 80,
        font_family: "Pretendard".into(),
        font_size: 12,
        font_weight: "bold".into(),
        notification_enabled: false,
        auto_login: true,
    };

    store.save(&settings).await.expect("save");
    let loaded = store.load().await.expect("load");

    assert_eq!(loaded, settings);
    assert_eq!(store.path().file_name().and_then(|n| n.to_str()), Some("chatSettings.json"));
}

#[tokio::test]
async fn missing_blob_loads_defaults() {
    let dir = tempdir().expect("tempdir");
    let store = SettingsStore::in_dir(dir.path());

    assert_eq!(store.load().await.expect("load"), ChatSettings::default());
}

#[tokio::test]
async fn malformed_blob_opens_with_defaults() {
    let dir = tempdir().expect("tempdir");
    let store = SettingsStore::in_dir(dir.path());
    std::fs::write(store.path(), "{not json").expect("write");

    let service = SettingsService::open(store).await;

    assert_eq!(service.current(), ChatSettings::default());
}

#[tokio::test]
async fn updates_reach_every_subscriber() {
    let dir = tempdir().expect("tempdir");
    let service = SettingsService::open(SettingsStore::in_dir(dir.path())).await;
    let mut first = service.subscribe();
    let mut second = service.subscribe();

    service
        .update(|settings| settings.font_size = 18)
        .await
        .expect("update");

    first.changed().await.expect("first notified");
    second.changed().await.expect("second notified");
    assert_eq!(first.borrow().font_size, 18);
    assert_eq!(second.borrow().font_size, 18);
    assert_eq!(service.store().load().await.expect("load").font_size, 18);
}

#[tokio::test]
async fn reload_publishes_external_writes_once() {
    let dir = tempdir().expect("tempdir");
    let service = SettingsService::open(SettingsStore::in_dir(dir.path())).await;
    let other_process = SettingsStore::in_dir(dir.path());
    other_process
        .save(&ChatSettings {
            notification_enabled: false,
            ..ChatSettings::default()
        })
        .await
        .expect("external save");

    assert!(service.reload().await.expect("reload"));
    assert!(!service.reload().await.expect("second reload"));
    assert!(!service.current().notification_enabled);
}
