use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    response::Response,
};
use disparador_core::types::Profile;
use disparador_dispatch::{Actor, DispatchService};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing;
use uuid::Uuid;

/// Header the relay uses to identify the dispatching user on callbacks.
pub const UNIQUE_ID_HEADER: &str = "x-unique-id";

pub const STATUS_WEBHOOK_PATH: &str = "/api/v1/webhook/status";

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Browsers cannot set headers on a WebSocket handshake, so `/ws` takes `?token=`.
fn extract_query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(|t| t.to_string())
        .filter(|t| !t.is_empty())
}

/// Generate JWT token for a user id
pub fn generate_token(user_id: Uuid, secret: &str, expires_in_days: u64) -> Result<String, StatusCode> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .as_secs() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + (expires_in_days * 24 * 60 * 60) as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(|e| {
            tracing::error!("Failed to generate JWT token: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// Verify JWT token and extract the user id
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, StatusCode> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());

    match decode::<Claims>(token, &decoding_key, &Validation::default()) {
        Ok(token_data) => Uuid::parse_str(&token_data.claims.sub).map_err(|_| {
            tracing::debug!("JWT subject is not a user id");
            StatusCode::UNAUTHORIZED
        }),
        Err(e) => {
            tracing::debug!("JWT verification failed: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn actor_for(profile: Option<Profile>) -> Result<Actor, StatusCode> {
    match profile {
        Some(profile) => Ok(Actor {
            user_id: profile.id,
            is_admin: profile.is_admin,
        }),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Resolve the caller to an `Actor` before any handler runs. The status webhook
/// authenticates with `x-unique-id`; everything else with a bearer JWT. Fails closed.
pub async fn auth_middleware(
    mut req: Request,
    next: axum::middleware::Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if path == "/health" {
        return Ok(next.run(req).await);
    }

    let service = req
        .extensions()
        .get::<DispatchService>()
        .cloned()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    let store = &service.context().store;

    let actor = if path == STATUS_WEBHOOK_PATH {
        let unique_id = req
            .headers()
            .get(UNIQUE_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                tracing::debug!("Missing {} header", UNIQUE_ID_HEADER);
                StatusCode::UNAUTHORIZED
            })?;

        let profile = store.profile_by_unique_id(unique_id).await.map_err(|e| {
            tracing::error!("Failed to resolve relay caller: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        })?;
        actor_for(profile)?
    } else {
        let auth_header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let token = extract_token(auth_header)
            .or_else(|| {
                if path.starts_with("/ws") {
                    extract_query_token(req.uri().query())
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                tracing::debug!("Missing Authorization header");
                StatusCode::UNAUTHORIZED
            })?;

        let user_id = verify_token(&token, &service.context().config.server.jwt_secret)?;
        let profile = store.profile(user_id).await.map_err(|e| {
            tracing::error!("Failed to load profile {}: {}", user_id, e);
            StatusCode::SERVICE_UNAVAILABLE
        })?;
        actor_for(profile)?
    };

    tracing::debug!("Authenticated user: {} (admin: {})", actor.user_id, actor.is_admin);
    req.extensions_mut().insert(actor);

    Ok(next.run(req).await)
}
