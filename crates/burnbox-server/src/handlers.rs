use axum::{
    extract::{rejection::FormRejection, Path, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    store::{ConsumeResult, SecretView, StoreError},
    AppState,
};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

/// Form body of `POST /v1/secret`. Fields stay strings so that bad numbers
/// are reported the same way as missing ones.
#[derive(Debug, Deserialize)]
pub struct CreateForm {
    pub secret: Option<String>,
    #[serde(rename = "expireAfterViews")]
    pub expire_after_views: Option<String>,
    /// Minutes until expiry; 0 means never.
    #[serde(rename = "expireAfter")]
    pub expire_after: Option<String>,
}

impl CreateForm {
    fn parse(self) -> Option<(String, i64, i64)> {
        let views = parse_number(&self.expire_after_views?)?;
        let ttl_minutes = parse_number(&self.expire_after?)?;
        Some((self.secret?, views, ttl_minutes))
    }
}

/// Integers, or finite decimals truncated toward zero ("1.5" is 1).
fn parse_number(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|n| n as i64)
    })
}

pub async fn create_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<CreateForm>, FormRejection>,
) -> Response {
    let Some((secret, views, ttl_minutes)) = form.ok().and_then(|Form(f)| f.parse()) else {
        return invalid_input();
    };

    match state.store.create(&secret, views, ttl_minutes) {
        Ok(record) => {
            info!(
                id = record.id,
                views,
                ttl_minutes,
                "secret created"
            );
            render(&headers, &record.view())
        }
        Err(StoreError::ValidationFailed(reason)) => {
            debug!(%reason, "rejected secret");
            invalid_input()
        }
        Err(e) => internal_error(e.into()),
    }
}

// ── Get ───────────────────────────────────────────────────────────────────────

pub async fn get_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hash): Path<String>,
) -> Response {
    match state.store.consume(&hash) {
        Ok(ConsumeResult::Consumed(record)) => {
            info!(
                id = record.id,
                remaining_views = record.remaining_views,
                "secret read"
            );
            render(&headers, &record.view())
        }
        Ok(ConsumeResult::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Secret not found"})),
        )
            .into_response(),
        Err(e) => internal_error(e.into()),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn wants_xml(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/xml"))
}

/// JSON unless the client asked for XML.
fn render(headers: &HeaderMap, view: &SecretView) -> Response {
    if !wants_xml(headers) {
        return Json(view).into_response();
    }
    match quick_xml::se::to_string(view) {
        Ok(xml) => ([(CONTENT_TYPE, "application/xml")], xml).into_response(),
        Err(e) => internal_error(anyhow::Error::new(e).context("render xml")),
    }
}

fn invalid_input() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "Invalid input"})),
    )
        .into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, Router};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        handle::DEFAULT_HANDLE_LEN,
        router,
        store::{SecretStore, MAX_SECRET_BYTES},
    };

    fn app() -> Router {
        router(AppState {
            store: SecretStore::in_memory(DEFAULT_HANDLE_LEN),
        })
    }

    fn post_form(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/secret")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn get(hash: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("/v1/secret/{hash}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_string(response).await).unwrap()
    }

    #[tokio::test]
    async fn create_and_read_once() {
        let app = app();

        let created = app
            .clone()
            .oneshot(post_form("secret=top+secret&expireAfterViews=1&expireAfter=0"))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::OK);
        let created = body_json(created).await;
        assert_eq!(created["secretText"], "top secret");
        assert_eq!(created["remainingViews"], 1);
        assert!(created.get("expiresAt").is_none());
        let hash = created["hash"].as_str().unwrap().to_owned();
        assert_eq!(hash.len(), 64);

        let read = app.clone().oneshot(get(&hash)).await.unwrap();
        assert_eq!(read.status(), StatusCode::OK);
        let read = body_json(read).await;
        assert_eq!(read["secretText"], "top secret");
        assert_eq!(read["remainingViews"], 0);

        let again = app.oneshot(get(&hash)).await.unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(again).await["error"], "Secret not found");
    }

    #[tokio::test]
    async fn expiring_secret_reports_expiry() {
        let response = app()
            .oneshot(post_form("secret=x&expireAfterViews=5&expireAfter=10"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view: SecretView = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            view.expires_at,
            Some(view.created_at + chrono::Duration::minutes(10))
        );
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        for body in [
            "secret=x&expireAfterViews=invalid&expireAfter=10",
            "secret=x&expireAfterViews=0&expireAfter=10",
            "secret=&expireAfterViews=1&expireAfter=0",
            "expireAfterViews=1&expireAfter=0",
            "secret=x&expireAfterViews=1",
            "secret=x&expireAfterViews=NaN&expireAfter=0",
            "secret=x&expireAfterViews=1&expireAfter=inf",
        ] {
            let response = app().oneshot(post_form(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{body}");
            assert_eq!(body_json(response).await["error"], "Invalid input");
        }
    }

    #[tokio::test]
    async fn non_form_body_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/secret")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"secret":"x"}"#))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unknown_hash_is_not_found() {
        let response = app().oneshot(get("nothing-here")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn xml_on_request() {
        let mut request = post_form("secret=hello&expireAfterViews=2&expireAfter=0");
        request
            .headers_mut()
            .insert(ACCEPT, "application/xml".parse().unwrap());
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/xml"
        );
        let xml = body_string(response).await;
        assert!(xml.starts_with("<Secret>"), "{xml}");
        assert!(xml.contains("<secretText>hello</secretText>"), "{xml}");
        assert!(xml.contains("<remainingViews>2</remainingViews>"), "{xml}");
        assert!(!xml.contains("expiresAt"), "{xml}");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn decimal_numbers_are_truncated() {
        let response = app()
            .oneshot(post_form("secret=x&expireAfterViews=5.0&expireAfter=1.5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let view: SecretView = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(view.remaining_views, 5);
        assert_eq!(
            view.expires_at,
            Some(view.created_at + chrono::Duration::minutes(1))
        );
    }

    #[tokio::test]
    async fn largest_secret_fits_when_percent_encoded() {
        // Two UTF-8 bytes per char, six bytes each once encoded.
        let body = format!(
            "secret={}&expireAfterViews=1&expireAfter=0",
            "%C3%A9".repeat(MAX_SECRET_BYTES / 2)
        );
        let response = app().oneshot(post_form(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["remainingViews"], 1);
        assert_eq!(
            created["secretText"].as_str().unwrap().len(),
            MAX_SECRET_BYTES
        );
    }

    #[tokio::test]
    async fn oversized_secret_is_invalid_input() {
        let body = format!(
            "secret={}&expireAfterViews=1&expireAfter=0",
            "a".repeat(MAX_SECRET_BYTES + 1)
        );
        let response = app().oneshot(post_form(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_json(response).await["error"], "Invalid input");
    }
}
