//! Remote data gateway
//!
//! Request/response operations against the tournament service. Stateless
//! per call, no retries of its own; every request carries the shared bearer
//! credential and a bounded timeout so a hung call cannot block the intent
//! queue indefinitely.
//!
//! # Architecture
//!
//! The `RemoteGateway` trait is the seam the reconciler depends on;
//! `HttpGateway` binds it to the service's REST endpoints. A 401-equivalent
//! response invalidates the cached credential and surfaces `AuthExpired`
//! rather than retrying with a token the service already rejected.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use wjs_common::api::auth::AuthState;
use wjs_common::api::types::{
    DetailKey, LoginRequest, LoginResponse, PublishScoresRequest, PublishedScoresResponse,
    ScoreAck, SetActiveDivisionRequest, SetActiveParticipantRequest, SubmitScoreRequest,
    TournamentDetailUpdate,
};
use wjs_common::models::{
    Division, JudgeCode, Participant, PublishedScore, Score, TournamentDetails,
};
use wjs_common::scoring::PublishPayload;
use wjs_common::{Error, Result};

/// Default timeout for tournament service requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Logical operations the reconciler performs against the tournament
/// service. One implementation per transport; tests substitute their own.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Exchange judge credentials for a bearer token
    async fn login(&self, username: &str, password: &str) -> Result<()>;

    async fn list_divisions(&self) -> Result<Vec<Division>>;

    /// Activate a division; the server is the authority on `is_active`
    /// and answers with the division as recorded
    async fn set_active_division(&self, division_id: i64) -> Result<Division>;

    async fn list_participants(&self) -> Result<Vec<Participant>>;

    async fn get_active_participant(&self) -> Result<Option<Participant>>;

    async fn set_active_participant(&self, participant_id: i64) -> Result<Participant>;

    async fn get_tournament_details(&self) -> Result<TournamentDetails>;

    async fn set_tournament_detail(&self, key: DetailKey, value: i64) -> Result<()>;

    async fn list_scores(&self, participant_id: i64) -> Result<Vec<Score>>;

    async fn post_score(&self, participant_id: i64, judge: JudgeCode, score: f64) -> Result<()>;

    /// Persist a participant's complete score set in one write
    async fn publish_scores(
        &self,
        participant_id: i64,
        payload: &PublishPayload,
    ) -> Result<Vec<PublishedScore>>;
}

/// HTTP implementation of the gateway
pub struct HttpGateway {
    http: Client,
    base_url: String,
    auth: Arc<AuthState>,
}

impl HttpGateway {
    /// Create a gateway against `base_url` with the default timeout
    pub fn new(base_url: impl Into<String>, auth: Arc<AuthState>) -> Result<Self> {
        Self::with_timeout(base_url, auth, DEFAULT_TIMEOUT)
    }

    /// Create a gateway with an explicit per-request timeout
    pub fn with_timeout(
        base_url: impl Into<String>,
        auth: Arc<AuthState>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Attach the bearer credential and send; normalizes transport errors
    /// and credential rejection, but leaves other statuses to `check`
    async fn send_raw(&self, builder: RequestBuilder) -> Result<Response> {
        let builder = match self.auth.bearer().await {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Network("request timed out".to_string())
            } else {
                Error::Network(e.to_string())
            }
        })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
            return Err(Error::AuthExpired);
        }
        Ok(response)
    }

    async fn check(response: Response) -> Result<Response> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Network(format!("service returned {status}: {body}")));
        }
        Ok(response)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self.send_raw(builder).await?;
        Self::check(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.http.get(self.url(path))).await?;
        Self::decode(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.send(self.http.post(self.url(path)).json(body)).await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn login(&self, username: &str, password: &str) -> Result<()> {
        debug!(username = %username, "Logging in to tournament service");
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: LoginResponse = self.post_json("auth/login", &request).await?;
        self.auth.set_token(response.token).await;
        info!(username = %username, "Authenticated with tournament service");
        Ok(())
    }

    async fn list_divisions(&self) -> Result<Vec<Division>> {
        debug!("Fetching divisions");
        self.get_json("divisions").await
    }

    async fn set_active_division(&self, division_id: i64) -> Result<Division> {
        debug!(division_id, "Activating division");
        self.post_json(
            "divisions/set-active",
            &SetActiveDivisionRequest { division_id },
        )
        .await
    }

    async fn list_participants(&self) -> Result<Vec<Participant>> {
        debug!("Fetching participants");
        self.get_json("participants").await
    }

    async fn get_active_participant(&self) -> Result<Option<Participant>> {
        let response = self
            .send_raw(self.http.get(self.url("participants/active")))
            .await?;
        // No active participant is a normal condition, not a failure
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        Self::decode(response).await
    }

    async fn set_active_participant(&self, participant_id: i64) -> Result<Participant> {
        debug!(participant_id, "Setting active participant");
        self.post_json(
            "participants/active",
            &SetActiveParticipantRequest { participant_id },
        )
        .await
    }

    async fn get_tournament_details(&self) -> Result<TournamentDetails> {
        debug!("Fetching tournament details");
        self.get_json("tournament-details").await
    }

    async fn set_tournament_detail(&self, key: DetailKey, value: i64) -> Result<()> {
        debug!(key = key.as_str(), value, "Updating tournament detail");
        let update = TournamentDetailUpdate {
            argument: key,
            value,
        };
        self.send(self.http.post(self.url("tournament-details")).json(&update))
            .await?;
        Ok(())
    }

    async fn list_scores(&self, participant_id: i64) -> Result<Vec<Score>> {
        debug!(participant_id, "Fetching scores");
        self.get_json(&format!("scores/{participant_id}")).await
    }

    async fn post_score(&self, participant_id: i64, judge: JudgeCode, score: f64) -> Result<()> {
        debug!(participant_id, judge = %judge, score, "Submitting score");
        let request = SubmitScoreRequest {
            participant_id,
            score: Score::new(judge, score),
        };
        let ack: ScoreAck = self.post_json("scores", &request).await?;
        ack.into_result()
    }

    async fn publish_scores(
        &self,
        participant_id: i64,
        payload: &PublishPayload,
    ) -> Result<Vec<PublishedScore>> {
        debug!(
            participant_id,
            entries = payload.entries.len(),
            "Publishing scores"
        );
        let request = PublishScoresRequest {
            participant_id,
            scores: payload.entries.clone(),
        };
        let response: PublishedScoresResponse = self.post_json("scores/publish", &request).await?;
        response.into_result()
    }
}
