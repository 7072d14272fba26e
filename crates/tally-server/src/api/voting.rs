//! Poll options, cached results, and the vote write path.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use tally_core::{RequestId, ResultSnapshot};
use tally_store::{OptionRepo, ResultsRepo, StoreError, VoteRecord, VoteRepo};
use tokio::task;
use tracing::{debug, info, instrument, warn};

use super::auth::{session_token, session_user};
use super::{blocking, ApiError, ApiState};

/// GET /api/voting/options
pub async fn options(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let options = blocking(move || {
        OptionRepo::new(state.db)
            .list()
            .map_err(|e| ApiError::database("Failed to retrieve voting options", e))
    })
    .await?;
    Ok(Json(json!({ "success": true, "options": options })))
}

/// GET /api/voting/results
pub async fn results(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    let (snapshot, cached) = blocking(move || {
        current_results(&state)
            .map_err(|e| ApiError::database("Failed to retrieve voting results", e))
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "results": snapshot,
        "cached": cached,
    })))
}

fn current_results(state: &ApiState) -> Result<(ResultSnapshot, bool), StoreError> {
    let db = state.db.clone();
    state
        .results_cache
        .get_or_compute(|| ResultsRepo::new(db).current())
}

/// Parse `optionId`: any non-zero integer.
fn parse_option_id(body: &Value) -> Result<i64, ApiError> {
    body.get("optionId")
        .and_then(Value::as_i64)
        .filter(|id| *id != 0)
        .ok_or_else(|| ApiError::InvalidInput("Option ID is required and must be a number".into()))
}

/// POST /api/voting/vote
#[instrument(skip_all, fields(request_id = %RequestId::new()))]
pub async fn vote(
    State(state): State<ApiState>,
    jar: CookieJar,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) =
        body.map_err(|e| ApiError::InvalidInput(format!("Request body must be JSON: {e}")))?;
    let option_id = parse_option_id(&body)?;
    let token = session_token(&jar);

    let db_state = state.clone();
    let (user_id, record) =
        blocking(move || record_vote(&db_state, token.as_deref(), option_id)).await?;
    info!(user_id, option_id, vote_id = record.id, "vote accepted");

    if let Err(e) = task::spawn_blocking(move || publish_results(&state)).await {
        warn!(error = %e, "results publish task failed");
    }

    Ok(Json(json!({
        "success": true,
        "message": "Vote recorded successfully",
        "vote": record,
    })))
}

fn record_vote(
    state: &ApiState,
    token: Option<&str>,
    option_id: i64,
) -> Result<(i64, VoteRecord), ApiError> {
    let user = session_user(&state.db, token)?.ok_or(ApiError::Unauthorized)?;
    let votes = VoteRepo::new(state.db.clone());
    if votes
        .has_voted(user.id)
        .map_err(|e| ApiError::database("Failed to record vote", e))?
    {
        return Err(ApiError::DuplicateVote);
    }
    if !OptionRepo::new(state.db.clone())
        .exists(option_id)
        .map_err(|e| ApiError::database("Failed to record vote", e))?
    {
        return Err(ApiError::InvalidOption);
    }

    // concurrent requests from one session can both pass the check above
    let record = votes.cast(user.id, option_id).map_err(|e| match e {
        StoreError::Conflict(_) => ApiError::DuplicateVote,
        StoreError::NotFound(_) => ApiError::InvalidOption,
        other => ApiError::database("Failed to record vote", other),
    })?;
    Ok((user.id, record))
}

/// Recompute results and push them to every socket.
///
/// Never fails the caller: the vote is already committed. The recompute runs
/// inside the broadcast ordering so a slower publisher cannot overwrite a
/// newer tally on the clients.
fn publish_results(state: &ApiState) {
    let published = state.broadcast.publish(|| {
        state.results_cache.invalidate();
        current_results(state).map(|(snapshot, _)| snapshot)
    });
    match published {
        Ok((snapshot, report)) => {
            debug!(
                success = report.success_count,
                failed = report.failure_count,
                total_votes = snapshot.total_votes,
                "results published"
            );
        }
        Err(e) => {
            warn!(error = %e, "results recompute failed, skipping broadcast");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::api::test_support::*;
    use axum::http::StatusCode;
    use tally_store::UserRepo;
    use tower::ServiceExt;

    fn login(state: &ApiState, name: &str) -> String {
        let (_, token) = UserRepo::new(state.db.clone()).create_session(name).unwrap();
        token.into_string()
    }

    fn vote_request(token: Option<&str>, body: Value) -> axum::http::Request<axum::body::Body> {
        let req = json_request("POST", "/api/voting/vote", &body);
        match token {
            Some(t) => with_cookie(req, t),
            None => req,
        }
    }

    #[test]
    fn option_id_parsing() {
        assert_eq!(parse_option_id(&json!({"optionId": 2})).unwrap(), 2);
        for bad in [
            json!({}),
            json!({"optionId": 0}),
            json!({"optionId": "2"}),
            json!({"optionId": null}),
            json!({"optionId": 1.5}),
        ] {
            assert_eq!(parse_option_id(&bad).unwrap_err().code(), "INVALID_INPUT");
        }
    }

    #[tokio::test]
    async fn options_lists_seeded_rows() {
        let app = router(state());
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/voting/options")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["success"], true);
        let names: Vec<&str> = body["options"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["optionName"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["Option A", "Option B", "Option C"]);
    }

    #[tokio::test]
    async fn results_are_cached_until_a_vote() {
        let state = state();
        let get = || {
            axum::http::Request::builder()
                .uri("/api/voting/results")
                .body(axum::body::Body::empty())
                .unwrap()
        };

        let first = read_json(router(state.clone()).oneshot(get()).await.unwrap()).await;
        assert_eq!(first["cached"], false);
        assert_eq!(first["results"]["totalVotes"], 0);
        let second = read_json(router(state.clone()).oneshot(get()).await.unwrap()).await;
        assert_eq!(second["cached"], true);

        let token = login(&state, "hal");
        let resp = router(state.clone())
            .oneshot(vote_request(Some(&token), json!({"optionId": 1})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // the vote path refreshed the cache with the new totals
        let third = read_json(router(state).oneshot(get()).await.unwrap()).await;
        assert_eq!(third["results"]["totalVotes"], 1);
        assert_eq!(third["results"]["options"][0]["percentage"], 100);
    }

    #[tokio::test]
    async fn vote_records_and_broadcasts() {
        let state = state();
        let (_conn, mut rx) = state.broadcast.accept().unwrap();
        let _ack = rx.try_recv().unwrap();
        let token = login(&state, "ivy");

        let resp = router(state.clone())
            .oneshot(vote_request(Some(&token), json!({"optionId": 2})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Vote recorded successfully");
        assert_eq!(body["vote"]["optionName"], "Option B");
        assert_eq!(body["vote"]["userName"], "ivy");

        let frame = match rx.try_recv().unwrap() {
            crate::websocket::Outbound::Text(t) => serde_json::from_str::<Value>(&t).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        };
        assert_eq!(frame["type"], "vote-update");
        assert_eq!(frame["data"]["totalVotes"], 1);
        assert_eq!(frame["data"]["options"][1]["count"], 1);
        assert!(rx.try_recv().is_err(), "exactly one broadcast per vote");
    }

    #[tokio::test]
    async fn publish_after_concurrent_votes_ends_on_latest_totals() {
        let state = state();
        let (_conn, mut rx) = state.broadcast.accept().unwrap();
        let _ack = rx.try_recv().unwrap();

        let mut requests = Vec::new();
        for name in ["ana", "ben", "cal", "dot", "eve", "fay"] {
            let token = login(&state, name);
            let app = router(state.clone());
            requests.push(tokio::spawn(async move {
                app.oneshot(vote_request(Some(&token), json!({"optionId": 1})))
                    .await
                    .unwrap()
                    .status()
            }));
        }
        for r in requests {
            assert_eq!(r.await.unwrap(), StatusCode::OK);
        }

        let mut totals = Vec::new();
        while let Ok(crate::websocket::Outbound::Text(t)) = rx.try_recv() {
            let v: Value = serde_json::from_str(&t).unwrap();
            totals.push(v["data"]["totalVotes"].as_u64().unwrap());
        }
        assert_eq!(totals.len(), 6);
        assert!(totals.windows(2).all(|w| w[0] <= w[1]), "{totals:?}");
        assert_eq!(totals.last(), Some(&6));
    }

    #[tokio::test]
    async fn vote_without_session_is_401() {
        let resp = router(state())
            .oneshot(vote_request(None, json!({"optionId": 1})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(read_json(resp).await["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn vote_with_revoked_session_is_401() {
        let resp = router(state())
            .oneshot(vote_request(Some("not-a-token"), json!({"optionId": 1})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn second_vote_is_409() {
        let state = state();
        let token = login(&state, "jon");
        let first = router(state.clone())
            .oneshot(vote_request(Some(&token), json!({"optionId": 1})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = router(state)
            .oneshot(vote_request(Some(&token), json!({"optionId": 2})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(read_json(second).await["error"]["code"], "DUPLICATE_VOTE");
    }

    #[tokio::test]
    async fn unknown_option_is_400() {
        let state = state();
        let token = login(&state, "kim");
        let resp = router(state)
            .oneshot(vote_request(Some(&token), json!({"optionId": 99})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(resp).await["error"]["code"], "INVALID_OPTION");
    }

    #[tokio::test]
    async fn missing_option_id_is_400() {
        let state = state();
        let token = login(&state, "lea");
        let resp = router(state)
            .oneshot(vote_request(Some(&token), json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = read_json(resp).await;
        assert_eq!(body["error"]["code"], "INVALID_INPUT");
        assert_eq!(
            body["error"]["message"],
            "Option ID is required and must be a number"
        );
    }
}
