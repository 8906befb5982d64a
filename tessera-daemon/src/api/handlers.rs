use std::collections::HashMap;

use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tessera_core::audit::{AuditAction, AuditEvent, AuditTarget};
use tessera_core::wire::{EnrollResponse, EntryList, Health, InitialContext, JanitorReport};
use tessera_core::{AttestOutcome, VerificationFailure};

use super::{ApiError, AppState};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Multipart parts by name. Later parts with the same name win.
async fn read_parts(mut multipart: Multipart) -> Result<HashMap<String, Vec<u8>>, ApiError> {
    let mut parts = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("invalid part {name}: {e}")))?;
        parts.insert(name, data.to_vec());
    }
    Ok(parts)
}

fn take_part(parts: &mut HashMap<String, Vec<u8>>, name: &str) -> Result<Vec<u8>, ApiError> {
    parts
        .remove(name)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {name}")))
}

fn text_part(parts: &mut HashMap<String, Vec<u8>>, name: &str) -> Result<String, ApiError> {
    String::from_utf8(take_part(parts, name)?)
        .map_err(|_| ApiError::BadRequest(format!("{name} is not UTF-8")))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub ekpubhash: String,
    pub nofiles: Option<String>,
}

impl ListParams {
    fn with_files(&self) -> bool {
        self.nofiles.is_none()
    }
}

/// POST /v1/initiate
pub async fn initiate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<InitialContext>, ApiError> {
    let mut parts = read_parts(multipart).await?;
    let ekpubhash = text_part(&mut parts, "ekpubhash")?;
    match state.attest.initiate(&ekpubhash, now()) {
        Ok(initial) => Ok(Json(initial)),
        Err(VerificationFailure::Request(msg)) => Err(ApiError::BadRequest(msg)),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// POST /v1/complete
pub async fn complete(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut parts = read_parts(multipart).await?;
    let initial: InitialContext = serde_json::from_slice(&take_part(&mut parts, "initial")?)
        .map_err(|e| ApiError::BadRequest(format!("invalid initial context: {e}")))?;
    let quote = take_part(&mut parts, "quote")?;

    match state.attest.complete(&initial, &quote, now()).await {
        AttestOutcome::Issued(archive) => {
            Ok(([(header::CONTENT_TYPE, "application/zip")], archive).into_response())
        }
        AttestOutcome::Unenrolled(hash) => Err(ApiError::Unenrolled(hash)),
        AttestOutcome::VerificationFailed(VerificationFailure::Request(msg)) => {
            Err(ApiError::BadRequest(msg))
        }
        AttestOutcome::VerificationFailed(_) => Err(ApiError::AttestationFailed),
        AttestOutcome::GenerationFailed(reason) => Err(ApiError::Generation(reason)),
    }
}

/// POST /v1/add
pub async fn add(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<EnrollResponse>), ApiError> {
    let mut parts = read_parts(multipart).await?;
    let ek_pub = take_part(&mut parts, "ekpub")?;
    let profile = if parts.contains_key("profile") {
        Some(text_part(&mut parts, "profile")?)
    } else {
        None
    };

    let record = state.store.add(&ek_pub, profile.as_deref()).await?;
    state.audit.record(AuditEvent::new(
        AuditAction::Enrolled,
        AuditTarget::Identity(record.ekpubhash.clone()),
    ));
    Ok((
        StatusCode::CREATED,
        Json(EnrollResponse {
            ekpubhash: record.ekpubhash.to_string(),
        }),
    ))
}

/// GET /v1/query?ekpubhash=<prefix>[&nofiles]
pub async fn query(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<EntryList>, ApiError> {
    let entries = state
        .store
        .query(&params.ekpubhash, params.with_files())
        .await?;
    Ok(Json(EntryList { entries }))
}

/// POST /v1/delete[?nofiles]
pub async fn delete(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    multipart: Multipart,
) -> Result<Json<EntryList>, ApiError> {
    let mut parts = read_parts(multipart).await?;
    let prefix = text_part(&mut parts, "ekpubhash")?;
    let entries = state.store.delete(&prefix, params.with_files()).await?;
    state.audit.record(
        AuditEvent::new(AuditAction::Deleted, AuditTarget::Prefix(prefix))
            .with_metadata("count", entries.len().to_string()),
    );
    Ok(Json(EntryList { entries }))
}

/// POST /v1/reenroll[?nofiles]
pub async fn reenroll(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    multipart: Multipart,
) -> Result<Json<EntryList>, ApiError> {
    let mut parts = read_parts(multipart).await?;
    let prefix = text_part(&mut parts, "ekpubhash")?;
    let entries = state.store.reenroll(&prefix, params.with_files()).await?;
    state.audit.record(
        AuditEvent::new(AuditAction::Reenrolled, AuditTarget::Prefix(prefix))
            .with_metadata("count", entries.len().to_string()),
    );
    Ok(Json(EntryList { entries }))
}

/// GET /v1/janitor
pub async fn janitor(State(state): State<AppState>) -> Result<Json<JanitorReport>, ApiError> {
    let report = state.store.janitor().await?;
    state.audit.record(
        AuditEvent::new(AuditAction::JanitorSwept, AuditTarget::Store)
            .with_metadata("records", report.records.to_string())
            .with_metadata("staging_removed", report.staging_removed.to_string())
            .with_metadata("empty_removed", report.empty_removed.to_string()),
    );
    Ok(Json(report))
}

/// GET /v1/get-asset-signer
pub async fn asset_signer(State(state): State<AppState>) -> String {
    state.signer_public.clone()
}

/// GET /healthcheck
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
