pub mod app;
pub mod leaderboard;
pub mod model;
pub mod session;
pub mod stage;

#[cfg(feature = "ssr")]
pub mod config;
#[cfg(feature = "ssr")]
pub mod dataset;
#[cfg(feature = "ssr")]
pub mod sheet;
#[cfg(feature = "ssr")]
pub mod webhook;

#[cfg(feature = "ssr")]
use chrono::{DateTime, Utc};
#[cfg(feature = "ssr")]
use leptos::logging::{log, warn};
#[cfg(feature = "ssr")]
use std::collections::HashMap;
#[cfg(feature = "ssr")]
use std::sync::Arc;
#[cfg(feature = "ssr")]
use thiserror::Error;
#[cfg(feature = "ssr")]
use tokio::sync::RwLock;
#[cfg(feature = "ssr")]
use uuid::Uuid;

#[cfg(feature = "ssr")]
use crate::config::{Config, ConfigError};
#[cfg(feature = "ssr")]
use crate::dataset::{dataset_exists, read_dataset_bytes, verify_submission, DatasetError};
#[cfg(feature = "ssr")]
use crate::leaderboard::{
    distinct_groups, distinct_rooms, filter_rows, group_summaries, leaderboard, stage_tallies,
    summarize,
};
#[cfg(feature = "ssr")]
use crate::model::{Dashboard, LogFilter, SessionView, SubmitOutcome};
#[cfg(feature = "ssr")]
use crate::session::{Session, SessionError};
#[cfg(feature = "ssr")]
use crate::sheet::{LogSource, SheetCache, SheetError};
#[cfg(feature = "ssr")]
use crate::webhook::{WebhookClient, WebhookError};

#[cfg(feature = "hydrate")]
#[wasm_bindgen::prelude::wasm_bindgen]
pub fn hydrate() {
    use crate::app::*;
    console_error_panic_hook::set_once();
    leptos::mount::hydrate_body(App);
}

/// Name of the cookie holding a player's session token.
pub const SESSION_COOKIE: &str = "escape_session";

#[cfg(feature = "ssr")]
#[derive(Debug, Error)]
pub enum GameError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("There is no stage {0}.")]
    UnknownStage(u8),
    #[error("Please enter a number.")]
    InvalidAnswer,
    #[error("Could not check the answer: {0}")]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error("could not build the join QR code: {0}")]
    QrCode(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(feature = "ssr")]
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error(transparent)]
    Sheet(#[from] SheetError),
}

/// Lifetime of the session cookie. Sessions idle for longer are dropped from the store.
pub const SESSION_MAX_AGE_SECS: i64 = 86_400;

#[cfg(feature = "ssr")]
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session: Session,
    pub last_active: DateTime<Utc>,
}

/// Live sessions keyed by the token in the player's cookie. Sessions are never persisted.
#[cfg(feature = "ssr")]
pub type SessionStore = Arc<RwLock<HashMap<Uuid, SessionEntry>>>;

/// Removes sessions with no activity within the cookie lifetime.
#[cfg(feature = "ssr")]
pub fn evict_idle_sessions(sessions: &mut HashMap<Uuid, SessionEntry>, now: DateTime<Utc>) {
    let before = sessions.len();
    sessions.retain(|_, entry| (now - entry.last_active).num_seconds() < SESSION_MAX_AGE_SECS);
    let evicted = before - sessions.len();
    if evicted > 0 {
        log!("Evicted {} idle sessions", evicted);
    }
}

/// Everything server functions need, provided to them as context.
#[cfg(feature = "ssr")]
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub webhook: WebhookClient,
    pub sheet: Arc<SheetCache>,
}

#[cfg(feature = "ssr")]
impl AppState {
    pub fn new(config: Config) -> Result<Self, StartupError> {
        let webhook = WebhookClient::new(config.webhook_url.clone(), webhook::DEFAULT_TIMEOUT)?;
        let source = config.sheet_source.as_deref().map(LogSource::parse);
        let sheet = SheetCache::new(source, config.sheet_cache_ttl)?;
        Ok(Self {
            config: Arc::new(config),
            sessions: SessionStore::default(),
            webhook,
            sheet: Arc::new(sheet),
        })
    }

    pub fn from_env() -> Result<Self, StartupError> {
        Self::new(Config::from_env()?)
    }
}

/// Finds the session token in a `Cookie` header. Malformed tokens are ignored.
#[cfg(feature = "ssr")]
pub fn session_token_from_cookies(cookie_header: &str) -> Option<Uuid> {
    cookie_header
        .split(';')
        .map(str::trim)
        .find_map(|cookie| {
            cookie
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
}

#[cfg(feature = "ssr")]
pub fn session_cookie(token: Uuid) -> String {
    format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Strict",
        SESSION_COOKIE, token, SESSION_MAX_AGE_SECS
    )
}

/// The session behind `token`, or a fresh one when there is none.
#[cfg(feature = "ssr")]
pub async fn session_snapshot(state: &AppState, token: Option<Uuid>) -> SessionView {
    let sessions = state.sessions.read().await;
    token
        .and_then(|t| sessions.get(&t))
        .map(|entry| entry.session.view())
        .unwrap_or_else(|| Session::new().view())
}

/// Whether the stage's dataset can be served for download.
#[cfg(feature = "ssr")]
pub fn dataset_available(state: &AppState, stage_number: u8) -> Result<bool, GameError> {
    let definition = stage::stage(stage_number).ok_or(GameError::UnknownStage(stage_number))?;
    let available = dataset_exists(&state.config.data_dir, definition);
    if !available {
        warn!(
            "Dataset for stage {} is missing: {}",
            stage_number,
            dataset::dataset_path(&state.config.data_dir, definition).display()
        );
    }
    Ok(available)
}

/// Registers a group and starts its run. A new token is issued when the caller has none.
/// Returns the token to store in the cookie.
#[cfg(feature = "ssr")]
pub async fn register_group(
    state: &AppState,
    token: Option<Uuid>,
    group_name: &str,
    room: &str,
    now: DateTime<Utc>,
) -> Result<(Uuid, SessionView), GameError> {
    let token = token.unwrap_or_else(Uuid::new_v4);
    let mut sessions = state.sessions.write().await;
    evict_idle_sessions(&mut sessions, now);
    let mut session = sessions
        .get(&token)
        .map(|entry| entry.session.clone())
        .unwrap_or_default();
    session.register(group_name, room, now)?;
    let view = session.view();
    sessions.insert(
        token,
        SessionEntry {
            session,
            last_active: now,
        },
    );
    log!(
        "Registered group {:?} in classroom {:?}",
        view.group_name,
        view.room
    );
    Ok((token, view))
}

/// Checks an answer for `stage_number` and applies it to the session.
///
/// The dataset is read outside the session lock; the transition itself happens under the write
/// lock and is refused if the session moved on in the meantime. The attempt is delivered to the
/// webhook after the lock is released. A failed delivery does not undo the transition; it is
/// reported back in the outcome.
#[cfg(feature = "ssr")]
pub async fn submit_stage_answer(
    state: &AppState,
    token: Option<Uuid>,
    stage_number: u8,
    answer: f64,
    now: DateTime<Utc>,
) -> Result<SubmitOutcome, GameError> {
    if !answer.is_finite() {
        return Err(GameError::InvalidAnswer);
    }
    let token = token.ok_or(SessionError::NotInStage)?;
    let definition = stage::stage(stage_number).ok_or(GameError::UnknownStage(stage_number))?;

    {
        let sessions = state.sessions.read().await;
        let current = sessions
            .get(&token)
            .and_then(|entry| entry.session.current_stage())
            .ok_or(SessionError::NotInStage)?;
        if current != stage_number {
            return Err(SessionError::StaleSubmission {
                checked: stage_number,
                current,
            }
            .into());
        }
    }

    let data_dir = state.config.data_dir.clone();
    let verification =
        tokio::task::spawn_blocking(move || verify_submission(&data_dir, definition, answer))
            .await??;

    let (transition, view) = {
        let mut sessions = state.sessions.write().await;
        let entry = sessions.get_mut(&token).ok_or(SessionError::NotInStage)?;
        let transition = entry.session.submit_answer(&verification, now)?;
        entry.last_active = now;
        (transition, entry.session.view())
    };
    log!(
        "{} / {}: stage {} answer {} is {}",
        transition.record.group_name,
        transition.record.classroom,
        stage_number,
        answer,
        transition.verdict.label()
    );

    let delivery_error = match state.webhook.send(&transition.record).await {
        Ok(()) => None,
        Err(e) => {
            warn!("Could not log attempt for {}: {}", transition.record.group_name, e);
            Some(e.to_string())
        }
    };

    Ok(SubmitOutcome {
        session: view,
        verdict: transition.verdict,
        cue: transition.cue,
        delivery_error,
    })
}

/// Returns the hint for the session's current stage and marks it as used.
#[cfg(feature = "ssr")]
pub async fn take_hint(
    state: &AppState,
    token: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<String, GameError> {
    let token = token.ok_or(SessionError::NotInStage)?;
    let mut sessions = state.sessions.write().await;
    let entry = sessions.get_mut(&token).ok_or(SessionError::NotInStage)?;
    let hint = entry.session.use_hint()?;
    entry.last_active = now;
    Ok(hint.to_string())
}

#[cfg(feature = "ssr")]
pub async fn restart_session(
    state: &AppState,
    token: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<SessionView, GameError> {
    let token = token.ok_or(SessionError::NotFinished)?;
    let mut sessions = state.sessions.write().await;
    let entry = sessions.get_mut(&token).ok_or(SessionError::NotFinished)?;
    entry.session.play_again()?;
    entry.last_active = now;
    Ok(entry.session.view())
}

/// Loads the results sheet (through the cache) and computes every dashboard view for the rows
/// the filter selects. Filter choices are always offered from the full sheet.
#[cfg(feature = "ssr")]
pub async fn build_dashboard(state: &AppState, filter: &LogFilter) -> Result<Dashboard, GameError> {
    let rows = state.sheet.rows().await.inspect_err(|e| {
        leptos::logging::error!("Could not load the results sheet: {}", e);
    })?;
    let filtered = filter_rows(&rows, filter);

    let join_qr_svg = state
        .config
        .public_url
        .as_deref()
        .map(join_qr_svg)
        .transpose()?;

    Ok(Dashboard {
        summary: summarize(&filtered),
        leaderboard: leaderboard(&filtered),
        group_summaries: group_summaries(&filtered),
        stage_tallies: stage_tallies(&filtered),
        all_groups: distinct_groups(&rows),
        all_rooms: distinct_rooms(&rows),
        rows: filtered,
        join_qr_svg,
    })
}

/// Renders `url` as an SVG QR code.
#[cfg(feature = "ssr")]
pub fn join_qr_svg(url: &str) -> Result<String, GameError> {
    use qrcode::render::svg;
    use qrcode::QrCode;

    let code = QrCode::new(url.as_bytes()).map_err(|e| GameError::QrCode(e.to_string()))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(180, 180)
        .quiet_zone(true)
        .build())
}

/// Serves one of the stage datasets as a CSV download. Only the known dataset files are served.
#[cfg(feature = "ssr")]
pub async fn download_dataset(state: &AppState, file_name: &str) -> axum::response::Response {
    use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    let Some(definition) = stage::stage_for_file(file_name) else {
        return (StatusCode::NOT_FOUND, "Unknown dataset").into_response();
    };
    match read_dataset_bytes(&state.config.data_dir, definition) {
        Ok(bytes) => (
            [
                (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", definition.dataset_file),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(DatasetError::NotFound(path)) => {
            warn!("Dataset missing: {}", path.display());
            (StatusCode::NOT_FOUND, "Dataset not found").into_response()
        }
        Err(e) => {
            leptos::logging::error!("Could not serve {}: {}", file_name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Could not read dataset").into_response()
        }
    }
}

#[cfg(all(test, feature = "ssr"))]
mod tests {
    use super::*;
    use crate::model::{Cue, Phase, Verdict};
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use chrono::TimeZone;

    fn test_state(vars: &[(&str, &str)]) -> AppState {
        let data_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/data");
        let config = Config::from_lookup(|name| {
            if name == "DATA_DIR" {
                return Some(data_dir.to_string());
            }
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();
        AppState::new(config).unwrap()
    }

    fn t(minutes: u32, seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 9, minutes, seconds).unwrap()
    }

    const ANSWERS: [f64; 5] = [9870.0, 5.0, 487.63, 112.0, 3.89];

    #[test]
    fn test_session_token_from_cookies() {
        let token = Uuid::new_v4();
        let header = format!("theme=dark; {}={}; other=1", SESSION_COOKIE, token);
        assert_eq!(session_token_from_cookies(&header), Some(token));
        assert_eq!(session_token_from_cookies("theme=dark"), None);
        assert_eq!(
            session_token_from_cookies("escape_session=not-a-uuid"),
            None
        );
        assert_eq!(
            session_token_from_cookies(&format!("escape_session_old={}", token)),
            None
        );
    }

    #[test]
    fn test_session_cookie() {
        let token = Uuid::new_v4();
        let cookie = session_cookie(token);
        assert!(cookie.starts_with(&format!("escape_session={};", token)));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains(&format!("Max-Age={}", SESSION_MAX_AGE_SECS)));
        assert_eq!(session_token_from_cookies(&cookie), Some(token));
    }

    #[test]
    fn test_join_qr_svg() {
        let svg = join_qr_svg("http://10.0.0.5:3000/").unwrap();
        assert!(svg.contains("<svg"));
    }

    #[tokio::test]
    async fn test_unknown_token_gets_fresh_session() {
        let state = test_state(&[]);
        assert_eq!(session_snapshot(&state, None).await, SessionView::default());
        assert_eq!(
            session_snapshot(&state, Some(Uuid::new_v4())).await.phase,
            Phase::Registration
        );
    }

    #[tokio::test]
    async fn test_register_rejects_blank_names() {
        let state = test_state(&[]);
        let err = register_group(&state, None, "  ", "M.3/1", t(0, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::Session(SessionError::MissingRegistration)
        ));
        assert!(state.sessions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_full_run() {
        let state = test_state(&[]);
        let (token, view) = register_group(&state, None, "Owls", "M.3/1", t(0, 0))
            .await
            .unwrap();
        assert_eq!(view.phase, Phase::Stage(1));

        let wrong = submit_stage_answer(&state, Some(token), 1, 1.0, t(0, 30))
            .await
            .unwrap();
        assert_eq!(wrong.verdict, Verdict::Incorrect);
        assert_eq!(wrong.cue, Cue::Retry);
        assert_eq!(wrong.session.phase, Phase::Stage(1));

        for (i, answer) in ANSWERS.iter().enumerate() {
            let n = i as u8 + 1;
            let outcome = submit_stage_answer(&state, Some(token), n, *answer, t(2, 5))
                .await
                .unwrap();
            assert_eq!(outcome.verdict, Verdict::Correct);
        }

        let view = session_snapshot(&state, Some(token)).await;
        assert_eq!(view.phase, Phase::Summary);
        assert!(view.completed);
        assert_eq!(view.badges, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            view.completion_duration.as_deref(),
            Some("2 minutes 5 seconds")
        );

        let view = restart_session(&state, Some(token), t(3, 0)).await.unwrap();
        assert_eq!(view, SessionView::default());
        assert_eq!(view, session_snapshot(&state, None).await);
    }

    #[tokio::test]
    async fn test_unconfigured_webhook_reports_failure() {
        let state = test_state(&[]);
        assert!(!state.webhook.is_configured());
        let (token, _) = register_group(&state, None, "Owls", "M.3/1", t(0, 0))
            .await
            .unwrap();
        let outcome = submit_stage_answer(&state, Some(token), 1, 9870.0, t(0, 10))
            .await
            .unwrap();
        assert_eq!(outcome.session.phase, Phase::Stage(2));
        assert_eq!(
            outcome.delivery_error.as_deref(),
            Some("results logging is not configured")
        );
    }

    #[tokio::test]
    async fn test_non_finite_answer_is_rejected() {
        let state = test_state(&[]);
        let (token, _) = register_group(&state, None, "Owls", "M.3/1", t(0, 0))
            .await
            .unwrap();
        for answer in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                submit_stage_answer(&state, Some(token), 1, answer, t(0, 10)).await,
                Err(GameError::InvalidAnswer)
            ));
        }
        let view = session_snapshot(&state, Some(token)).await;
        assert_eq!(view.phase, Phase::Stage(1));
        assert_eq!(view.answer_inputs[0], None);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted_on_registration() {
        let state = test_state(&[]);
        for name in ["Owls", "Foxes", "Hawks"] {
            register_group(&state, None, name, "M.3/1", t(0, 0))
                .await
                .unwrap();
        }
        let (active, _) = register_group(&state, None, "Bears", "M.3/2", t(0, 0))
            .await
            .unwrap();
        assert_eq!(state.sessions.read().await.len(), 4);

        // Bears keep playing well into the next day.
        let later = t(0, 0) + chrono::Duration::seconds(SESSION_MAX_AGE_SECS - 60);
        take_hint(&state, Some(active), later).await.unwrap();

        let next_day = t(0, 0) + chrono::Duration::seconds(SESSION_MAX_AGE_SECS + 1);
        let (newcomer, _) = register_group(&state, None, "Wolves", "M.3/3", next_day)
            .await
            .unwrap();
        let sessions = state.sessions.read().await;
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains_key(&active));
        assert!(sessions.contains_key(&newcomer));
    }

    #[tokio::test]
    async fn test_dataset_available() {
        let state = test_state(&[]);
        assert!(dataset_available(&state, 1).unwrap());
        assert!(matches!(
            dataset_available(&state, 0),
            Err(GameError::UnknownStage(0))
        ));

        let mut config = (*state.config).clone();
        config.data_dir = "/nonexistent/escape-room".into();
        let broken = AppState {
            config: Arc::new(config),
            ..state.clone()
        };
        assert!(!dataset_available(&broken, 1).unwrap());
    }

    #[tokio::test]
    async fn test_submit_for_wrong_stage_is_refused() {
        let state = test_state(&[]);
        let (token, _) = register_group(&state, None, "Owls", "M.3/1", t(0, 0))
            .await
            .unwrap();
        let err = submit_stage_answer(&state, Some(token), 2, 5.0, t(0, 10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GameError::Session(SessionError::StaleSubmission {
                checked: 2,
                current: 1
            })
        ));
        assert!(matches!(
            submit_stage_answer(&state, Some(token), 9, 5.0, t(0, 10)).await,
            Err(GameError::UnknownStage(9))
        ));
        assert!(matches!(
            submit_stage_answer(&state, None, 1, 9870.0, t(0, 10)).await,
            Err(GameError::Session(SessionError::NotInStage))
        ));
    }

    #[tokio::test]
    async fn test_missing_dataset_leaves_session_alone() {
        let state = test_state(&[]);
        let (token, _) = register_group(&state, None, "Owls", "M.3/1", t(0, 0))
            .await
            .unwrap();
        let mut config = (*state.config).clone();
        config.data_dir = "/nonexistent/escape-room".into();
        let broken = AppState {
            config: Arc::new(config),
            ..state.clone()
        };

        let err = submit_stage_answer(&broken, Some(token), 1, 9870.0, t(0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Dataset(DatasetError::NotFound(_))));
        assert_eq!(
            session_snapshot(&state, Some(token)).await.phase,
            Phase::Stage(1)
        );
    }

    #[tokio::test]
    async fn test_delivery_failure_still_advances() {
        // Nothing listens on port 9 locally.
        let state = test_state(&[("WEBHOOK_URL", "http://127.0.0.1:9/log")]);
        let (token, _) = register_group(&state, None, "Owls", "M.3/1", t(0, 0))
            .await
            .unwrap();
        let outcome = submit_stage_answer(&state, Some(token), 1, 9870.0, t(0, 10))
            .await
            .unwrap();
        assert_eq!(outcome.cue, Cue::Advance);
        assert_eq!(outcome.session.phase, Phase::Stage(2));
        assert!(outcome.delivery_error.is_some());
    }

    #[tokio::test]
    async fn test_take_hint() {
        let state = test_state(&[]);
        assert!(take_hint(&state, None, t(0, 0)).await.is_err());
        let (token, _) = register_group(&state, None, "Owls", "M.3/1", t(0, 0))
            .await
            .unwrap();
        let hint = take_hint(&state, Some(token), t(0, 20)).await.unwrap();
        assert_eq!(hint, stage::STAGES[0].hint);
        assert_eq!(
            session_snapshot(&state, Some(token)).await.hints_used,
            vec![1]
        );
    }

    #[tokio::test]
    async fn test_dashboard_requires_sheet() {
        let state = test_state(&[]);
        assert!(matches!(
            build_dashboard(&state, &LogFilter::default()).await,
            Err(GameError::Sheet(SheetError::NotConfigured))
        ));
    }

    #[tokio::test]
    async fn test_download_dataset() {
        let state = test_state(&[]);
        let response = download_dataset(&state, "1_sales_50.csv").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(b"OrderID,Region,Sales"));

        let response = download_dataset(&state, "../Cargo.toml").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
