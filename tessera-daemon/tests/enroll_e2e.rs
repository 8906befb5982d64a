//! Enrollment API over HTTP.

mod common;

use common::harness::{https_clients_profile, TestDaemon, FULL_PROFILE};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use tessera_auth::identity::PublicKey;
use tessera_auth::EkPubHash;
use tessera_core::wire::{EnrollResponse, EntryList, ErrorBody, Health, JanitorReport};

struct Api {
    base: String,
    client: reqwest::Client,
}

impl Api {
    async fn start(daemon: &TestDaemon) -> Self {
        Self {
            base: daemon.spawn().await,
            client: reqwest::Client::new(),
        }
    }

    async fn add(&self, ek_pub: &[u8], profile: Option<&str>) -> reqwest::Response {
        let mut form = Form::new().part("ekpub", Part::bytes(ek_pub.to_vec()).file_name("ek.pub"));
        if let Some(profile) = profile {
            form = form.text("profile", profile.to_string());
        }
        self.client
            .post(format!("{}/v1/add", self.base))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }

    async fn post_prefix(&self, path: &str, prefix: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .multipart(Form::new().text("ekpubhash", prefix.to_string()))
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_add_then_query() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;
    let ek_pub = daemon.ek_pub().await;

    let response = api.add(&ek_pub, Some(FULL_PROFILE)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let added: EnrollResponse = response.json().await.unwrap();
    assert_eq!(added.ekpubhash, EkPubHash::of(&ek_pub).as_str());

    let listing: EntryList = api
        .get(&format!("/v1/query?ekpubhash={}", &added.ekpubhash[..6]))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].ekpubhash, added.ekpubhash);
    assert_eq!(
        listing.entries[0].files.as_deref(),
        Some(&["ek.pub".to_string(), "ekpubhash".into(), "profile".into()][..])
    );

    let bare: EntryList = api
        .get("/v1/query?ekpubhash=&nofiles")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(bare.entries.len(), 1);
    assert!(bare.entries[0].files.is_none());
}

#[tokio::test]
async fn test_duplicate_add_conflicts() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;
    let ek_pub = daemon.ek_pub().await;

    assert_eq!(api.add(&ek_pub, None).await.status(), StatusCode::CREATED);
    let response = api.add(&ek_pub, Some(FULL_PROFILE)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(
        body.ekpubhash.as_deref(),
        Some(EkPubHash::of(&ek_pub).as_str())
    );

    // The first enrollment is untouched.
    let record = daemon
        .store
        .get(&EkPubHash::of(&ek_pub))
        .await
        .unwrap()
        .unwrap();
    assert!(record.profile.is_none());
}

#[tokio::test]
async fn test_add_validation() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;

    let response = api.add(b"ek", Some(r#"{"certgen": ["https-server"]}"#)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(api.add(b"ek", Some("not json")).await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(api.add(b"", None).await.status(), StatusCode::BAD_REQUEST);

    let response = api
        .client
        .post(format!("{}/v1/add", api.base))
        .multipart(Form::new().text("profile", "{}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(daemon.store.is_empty().await);
}

#[tokio::test]
async fn test_add_rejects_profile_too_large_for_one_archive() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;

    let response = api.add(b"ek-big", Some(&https_clients_profile(64))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = response.json().await.unwrap();
    assert!(body.error.contains("64 assets"));
    assert!(daemon.store.is_empty().await);

    let response = api.add(b"ek-big", Some(&https_clients_profile(63))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_query_rejects_bad_prefix() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;

    assert_eq!(
        api.get("/v1/query?ekpubhash=xyz").await.status(),
        StatusCode::BAD_REQUEST
    );
    let too_long = "a".repeat(65);
    assert_eq!(
        api.get(&format!("/v1/query?ekpubhash={too_long}"))
            .await
            .status(),
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_delete_by_prefix() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;
    for ek in [b"ek-one".as_slice(), b"ek-two", b"ek-three"] {
        assert_eq!(api.add(ek, None).await.status(), StatusCode::CREATED);
    }
    let target = EkPubHash::of(b"ek-two");

    let deleted: EntryList = api
        .post_prefix("/v1/delete", target.as_str())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(deleted.entries.len(), 1);
    assert_eq!(deleted.entries[0].ekpubhash, target.as_str());
    assert_eq!(daemon.store.len().await, 2);
    assert!(daemon.store.get(&target).await.unwrap().is_none());

    assert_eq!(
        api.post_prefix("/v1/delete", target.as_str()).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_empty_prefix_deletes_everything() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;
    for ek in [b"ek-one".as_slice(), b"ek-two"] {
        api.add(ek, None).await;
    }

    let response = api.post_prefix("/v1/delete?nofiles", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let deleted: EntryList = response.json().await.unwrap();
    assert_eq!(deleted.entries.len(), 2);
    assert!(deleted.entries.iter().all(|e| e.files.is_none()));
    assert!(daemon.store.is_empty().await);
}

#[tokio::test]
async fn test_reenroll_lists_without_modifying() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;
    let ek_pub = daemon.ek_pub().await;
    api.add(&ek_pub, Some(FULL_PROFILE)).await;
    let hash = EkPubHash::of(&ek_pub);

    let listing: EntryList = api
        .post_prefix("/v1/reenroll", &hash.as_str()[..2])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listing.entries.len(), 1);
    assert!(daemon.store.get(&hash).await.unwrap().is_some());

    let unmatched = if hash.as_str().starts_with('0') { "1" } else { "0" };
    assert_eq!(
        api.post_prefix("/v1/reenroll", unmatched).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_janitor_sweeps_staging() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;
    api.add(b"ek-one", None).await;
    std::fs::create_dir_all(daemon.dir.path().join("db/.staging/add-abandoned")).unwrap();

    let response = api.get("/v1/janitor").await;
    assert_eq!(response.status(), StatusCode::OK);
    let report: JanitorReport = response.json().await.unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.staging_removed, 1);
    assert!(report.malformed.is_empty());
}

#[tokio::test]
async fn test_asset_signer_matches_daemon_key() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;

    let response = api.get("/v1/get-asset-signer").await;
    assert_eq!(response.status(), StatusCode::OK);
    let hex = response.text().await.unwrap();
    let key = PublicKey::from_hex(hex.trim()).unwrap();
    assert_eq!(key, daemon.signer.public_key());
}

#[tokio::test]
async fn test_healthcheck() {
    let daemon = TestDaemon::new();
    let api = Api::start(&daemon).await;

    let health: Health = api.get("/healthcheck").await.json().await.unwrap();
    assert_eq!(health.status, "healthy");
    assert!(!health.version.is_empty());
}
