use chrono::{DateTime, Utc};
use leptos::ev::SubmitEvent;
use leptos::logging::log;
use leptos::prelude::*;
use leptos::server_fn::error::NoCustomError;
use leptos::task::spawn_local;
use leptos_meta::{provide_meta_context, MetaTags, Stylesheet, Title};
use leptos_router::{
    components::{Route, Router, Routes},
    path,
};
use std::time::Duration;

use crate::model::{
    Cue, Dashboard, GroupSummary, LeaderboardEntry, LogFilter, LogRow, Phase, SessionView,
    StageTally, SubmitOutcome,
};
use crate::session::format_elapsed;
use crate::stage::STAGE_COUNT;

#[cfg(feature = "ssr")]
use crate::{
    build_dashboard, dataset_available, register_group, restart_session, session_cookie,
    session_snapshot, session_token_from_cookies, submit_stage_answer, take_hint, AppState,
};
#[cfg(feature = "ssr")]
use uuid::Uuid;

/// How long the success banner stays up before the next stage is shown.
#[cfg(feature = "hydrate")]
const ADVANCE_DELAY_MS: u32 = 1_500;

#[cfg(feature = "ssr")]
async fn current_session_token() -> Result<Option<Uuid>, ServerFnError<NoCustomError>> {
    use axum::http::HeaderMap;
    use leptos_axum::extract;

    let headers: HeaderMap = extract()
        .await
        .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;

    Ok(headers
        .get(axum::http::header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(session_token_from_cookies))
}

#[server(GetSession)]
pub async fn get_session() -> Result<SessionView, ServerFnError<NoCustomError>> {
    let state: AppState = expect_context();
    let token = current_session_token().await?;
    Ok(session_snapshot(&state, token).await)
}

#[server(Register)]
pub async fn register_handler(
    group_name: String,
    room: String,
) -> Result<SessionView, ServerFnError<NoCustomError>> {
    let state: AppState = expect_context();
    let token = current_session_token().await?;

    let (token, view) = register_group(&state, token, &group_name, &room, Utc::now())
        .await
        .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?;

    use leptos_axum::ResponseOptions;
    let resp: ResponseOptions = expect_context();
    resp.insert_header(
        axum::http::header::SET_COOKIE,
        axum::http::HeaderValue::from_str(&session_cookie(token))
            .map_err(|e| ServerFnError::<NoCustomError>::ServerError(e.to_string()))?,
    );

    Ok(view)
}

#[server(SubmitAnswer)]
pub async fn submit_answer_handler(
    stage: u8,
    answer: f64,
) -> Result<SubmitOutcome, ServerFnError<NoCustomError>> {
    let state: AppState = expect_context();
    let token = current_session_token().await?;
    submit_stage_answer(&state, token, stage, answer, Utc::now())
        .await
        .map_err(|e| ServerFnError::ServerError(e.to_string()))
}

#[server(UseHint)]
pub async fn use_hint_handler() -> Result<String, ServerFnError<NoCustomError>> {
    let state: AppState = expect_context();
    let token = current_session_token().await?;
    take_hint(&state, token, Utc::now())
        .await
        .map_err(|e| ServerFnError::ServerError(e.to_string()))
}

#[server(PlayAgain)]
pub async fn play_again_handler() -> Result<SessionView, ServerFnError<NoCustomError>> {
    let state: AppState = expect_context();
    let token = current_session_token().await?;
    restart_session(&state, token, Utc::now())
        .await
        .map_err(|e| ServerFnError::ServerError(e.to_string()))
}

#[server(CheckDataset)]
pub async fn check_dataset_handler(stage: u8) -> Result<bool, ServerFnError<NoCustomError>> {
    let state: AppState = expect_context();
    dataset_available(&state, stage).map_err(|e| ServerFnError::ServerError(e.to_string()))
}

#[server(GetDashboard)]
pub async fn get_dashboard(
    filter: Option<LogFilter>,
) -> Result<Dashboard, ServerFnError<NoCustomError>> {
    let state: AppState = expect_context();
    build_dashboard(&state, &filter.unwrap_or_default())
        .await
        .map_err(|e| ServerFnError::ServerError(e.to_string()))
}

// Drops the cached sheet so the next dashboard load fetches it again.
#[server(RefreshDashboard)]
pub async fn refresh_dashboard_handler() -> Result<(), ServerFnError<NoCustomError>> {
    let state: AppState = expect_context();
    state.sheet.invalidate().await;
    Ok(())
}

pub fn shell(options: LeptosOptions) -> impl IntoView {
    view! {
        <!DOCTYPE html>
        <html lang="en">
            <head>
                <meta charset="utf-8" />
                <meta name="viewport" content="width=device-width, initial-scale=1" />
                <AutoReload options=options.clone() />
                <HydrationScripts options />
                <MetaTags />
            </head>
            <body>
                <App />
            </body>
        </html>
    }
}

#[component]
pub fn App() -> impl IntoView {
    // Provides context that manages stylesheets, titles, meta tags, etc.
    provide_meta_context();

    view! {
        // id=leptos means cargo-leptos will hot-reload this stylesheet
        <Stylesheet id="leptos" href="/pkg/data-escape-room.css" />

        <Title text="DATA Escape Room" />

        <Router>
            <main>
                <Routes fallback=|| "Page not found.".into_view()>
                    <Route path=path!("/") view=PlayerHome />
                    <Route path=path!("/admin") view=AdminDashboard />
                </Routes>
            </main>
        </Router>
    }
}

#[component]
fn PlayerHome() -> impl IntoView {
    let session = Resource::new(|| (), |_| get_session());
    let on_change = Callback::new(move |_: ()| session.refetch());
    // Survives the re-render that follows an advance, so a failed save stays visible.
    let delivery_warning = RwSignal::new(String::new());

    view! {
        <div class="escape-room">
            <h1>"DATA Escape Room"</h1>
            {move || {
                (!delivery_warning.get().is_empty())
                    .then(|| view! { <p class="warning">{delivery_warning.get()}</p> })
            }}
            <Transition fallback=|| {
                view! { "Loading..." }
            }>
                {move || {
                    session
                        .with(|res| match res {
                            Some(Ok(current)) => {
                                render_phase(current.clone(), on_change, delivery_warning)
                            }
                            Some(Err(e)) => {
                                view! {
                                    <p class="error">"Could not load your game: " {e.to_string()}</p>
                                }
                                    .into_any()
                            }
                            None => view! { "Loading..." }.into_any(),
                        })
                }}
            </Transition>
        </div>
    }
}

fn render_phase(
    session: SessionView,
    on_change: Callback<()>,
    delivery_warning: RwSignal<String>,
) -> AnyView {
    match session.phase {
        Phase::Registration => view! { <RegistrationForm on_change /> }.into_any(),
        Phase::Stage(number) => {
            view! {
                <Progress session=session.clone() />
                <StageView session number on_change delivery_warning />
            }
                .into_any()
        }
        Phase::Summary => {
            view! {
                <Progress session=session.clone() />
                <SummaryView session on_change />
            }
                .into_any()
        }
    }
}

#[component]
fn RegistrationForm(on_change: Callback<()>) -> impl IntoView {
    let group_name = RwSignal::new(String::new());
    let room = RwSignal::new(String::new());
    let error = RwSignal::new(String::new());

    let submit = move |ev: SubmitEvent| {
        ev.prevent_default();
        let g = group_name.get();
        let r = room.get();
        if g.trim().is_empty() || r.trim().is_empty() {
            error.set("Please enter both a group name and a classroom.".to_string());
            return;
        }
        spawn_local(async move {
            match register_handler(g, r).await {
                Ok(_) => {
                    error.set(String::new());
                    on_change.run(());
                }
                Err(e) => error.set(e.to_string()),
            }
        });
    };

    view! {
        <section class="registration">
            <h2>"Register your group"</h2>
            <p>
                "Solve five data puzzles to escape. Each stage gives you a dataset; find the answer hidden in it."
            </p>
            <form class="register-form" on:submit=submit>
                <label>
                    "Group name: "
                    <input
                        type="text"
                        prop:value=move || group_name.get()
                        on:input=move |ev| group_name.set(event_target_value(&ev))
                    />
                </label>
                <label>
                    "Classroom: "
                    <input
                        type="text"
                        prop:value=move || room.get()
                        on:input=move |ev| room.set(event_target_value(&ev))
                    />
                </label>
                <button type="submit">"Start"</button>
            </form>
            {move || (!error.get().is_empty()).then(|| view! { <p class="error">{error.get()}</p> })}
        </section>
    }
}

#[component]
fn Progress(session: SessionView) -> impl IntoView {
    let badges = session.badges.clone();
    let timer = session
        .started_at
        .filter(|_| !session.completed)
        .map(|started_at| view! { <ElapsedTimer started_at /> });

    view! {
        <div class="progress">
            <p class="team">{format!("{} ({})", session.group_name, session.room)}</p>
            <ul class="badges">
                {(1..=STAGE_COUNT)
                    .map(|n| {
                        let class = if badges.contains(&n) { "badge unlocked" } else { "badge" };
                        view! { <li class=class>{format!("Stage {}", n)}</li> }
                    })
                    .collect_view()}
            </ul>
            {timer}
        </div>
    }
}

/// Timer text for a run started at `started_at`. Empty until the client has read its clock, so
/// the server render and the first hydrated render agree.
fn elapsed_label(started_at: DateTime<Utc>, now: Option<DateTime<Utc>>) -> String {
    now.map(|now| format_elapsed((now - started_at).num_seconds().max(0) as u64))
        .unwrap_or_default()
}

#[component]
fn ElapsedTimer(started_at: DateTime<Utc>) -> impl IntoView {
    let now = RwSignal::new(None::<DateTime<Utc>>);

    // Client only: effects do not run during server rendering.
    Effect::new(move || {
        now.set(Some(Utc::now()));
        if let Ok(handle) = leptos::leptos_dom::helpers::set_interval_with_handle(
            move || now.set(Some(Utc::now())),
            Duration::from_secs(1),
        ) {
            on_cleanup(move || handle.clear());
        }
    });

    view! { <p class="timer">"Elapsed: " {move || elapsed_label(started_at, now.get())}</p> }
}

#[component]
fn StageView(
    session: SessionView,
    number: u8,
    on_change: Callback<()>,
    delivery_warning: RwSignal<String>,
) -> impl IntoView {
    let Some(definition) = crate::stage::stage(number) else {
        return view! { <p class="error">{format!("Stage {} does not exist.", number)}</p> }
            .into_any();
    };

    let previous = session
        .answer_inputs
        .get(usize::from(number - 1))
        .copied()
        .flatten();
    let answer = RwSignal::new(previous.map(|v| v.to_string()).unwrap_or_default());
    let hint = RwSignal::new(
        session
            .hints_used
            .contains(&number)
            .then(|| definition.hint.to_string()),
    );
    let dataset = Resource::new(move || number, check_dataset_handler);
    let banner = RwSignal::new(None::<(Cue, String)>);
    let error = RwSignal::new(String::new());
    let busy = RwSignal::new(false);

    let submit = move |ev: SubmitEvent| {
        ev.prevent_default();
        if busy.get_untracked() {
            return;
        }
        let Ok(value) = answer.get().trim().parse::<f64>() else {
            error.set("Please enter a number.".to_string());
            return;
        };
        busy.set(true);
        spawn_local(async move {
            match submit_answer_handler(number, value).await {
                Ok(outcome) => {
                    error.set(String::new());
                    delivery_warning.set(
                        outcome
                            .delivery_error
                            .map(|e| {
                                format!(
                                    "Your answer was checked, but it could not be saved to the results sheet: {}",
                                    e
                                )
                            })
                            .unwrap_or_default(),
                    );
                    match outcome.cue {
                        Cue::Retry => {
                            banner.set(Some((
                                Cue::Retry,
                                "Not quite. Look at the data again and retry.".to_string(),
                            )));
                            busy.set(false);
                        }
                        Cue::Advance => {
                            banner.set(Some((
                                Cue::Advance,
                                format!("Correct! Stage {} badge unlocked.", number),
                            )));
                            #[cfg(feature = "hydrate")]
                            {
                                gloo_timers::future::TimeoutFuture::new(ADVANCE_DELAY_MS).await;
                            }
                            on_change.run(());
                        }
                        Cue::Complete => on_change.run(()),
                    }
                }
                Err(e) => {
                    log!("Submit failed: {}", e);
                    error.set(e.to_string());
                    busy.set(false);
                }
            }
        });
    };

    let show_hint = move |_| {
        spawn_local(async move {
            match use_hint_handler().await {
                Ok(text) => hint.set(Some(text)),
                Err(e) => error.set(e.to_string()),
            }
        });
    };

    view! {
        <section class="stage">
            <h2>{format!("Stage {}: {}", number, definition.title)}</h2>
            <p class="prompt">{definition.prompt}</p>
            <Suspense fallback=|| ()>
                {move || {
                    dataset
                        .with(|res| match res {
                            Some(Ok(true)) => {
                                view! {
                                    <p>
                                        <a
                                            class="download"
                                            href=format!("/datasets/{}", definition.dataset_file)
                                            download=definition.dataset_file
                                            rel="external"
                                        >
                                            "Download "
                                            {definition.dataset_file}
                                        </a>
                                    </p>
                                }
                                    .into_any()
                            }
                            Some(Ok(false)) => {
                                view! {
                                    <p class="warning">
                                        {format!(
                                            "Dataset file not found: {}. Ask your teacher for the data.",
                                            definition.dataset_file,
                                        )}
                                    </p>
                                }
                                    .into_any()
                            }
                            Some(Err(e)) => {
                                view! {
                                    <p class="warning">
                                        "Could not check the dataset: " {e.to_string()}
                                    </p>
                                }
                                    .into_any()
                            }
                            None => ().into_any(),
                        })
                }}
            </Suspense>
            <form class="answer-form" on:submit=submit>
                <label>
                    "Your answer: "
                    <input
                        type="number"
                        step=definition.input_step.to_string()
                        prop:value=move || answer.get()
                        on:input=move |ev| answer.set(event_target_value(&ev))
                    />
                </label>
                <button type="submit" disabled=move || busy.get()>
                    "Submit"
                </button>
            </form>
            <button class="btn-hint" on:click=show_hint>
                "Show hint"
            </button>
            {move || hint.get().map(|text| view! { <p class="hint-text">{text}</p> })}
            {move || {
                banner
                    .get()
                    .map(|(cue, text)| {
                        let class = match cue {
                            Cue::Retry => "banner retry",
                            Cue::Advance | Cue::Complete => "banner advance",
                        };
                        view! { <p class=class>{text}</p> }
                    })
            }}
            {move || (!error.get().is_empty()).then(|| view! { <p class="error">{error.get()}</p> })}
        </section>
    }
        .into_any()
}

#[component]
fn SummaryView(session: SessionView, on_change: Callback<()>) -> impl IntoView {
    let error = RwSignal::new(String::new());

    let play_again = move |_| {
        spawn_local(async move {
            match play_again_handler().await {
                Ok(_) => {
                    error.set(String::new());
                    on_change.run(());
                }
                Err(e) => error.set(e.to_string()),
            }
        });
    };

    view! {
        <section class="summary">
            <h2>"You escaped!"</h2>
            <p>
                {format!(
                    "{} from {} cleared all {} stages.",
                    session.group_name,
                    session.room,
                    STAGE_COUNT,
                )}
            </p>
            <p class="time">
                "Time used: " {session.completion_duration.clone().unwrap_or_default()}
            </p>
            <button class="btn-play-again" on:click=play_again>
                "Play again"
            </button>
            {move || (!error.get().is_empty()).then(|| view! { <p class="error">{error.get()}</p> })}
        </section>
    }
}

#[component]
fn AdminDashboard() -> impl IntoView {
    let groups = RwSignal::new(Vec::<String>::new());
    let rooms = RwSignal::new(Vec::<String>::new());

    // Refetches whenever the filter selection changes.
    let dashboard = Resource::new(
        move || LogFilter {
            groups: groups.get(),
            rooms: rooms.get(),
        },
        |filter| get_dashboard(Some(filter)),
    );

    let refresh = move |_| {
        spawn_local(async move {
            match refresh_dashboard_handler().await {
                Ok(_) => dashboard.refetch(),
                Err(e) => log!("Error: {}", e),
            }
        });
    };

    let clear_filters = move |_| {
        groups.set(Vec::new());
        rooms.set(Vec::new());
    };

    view! {
        <div class="admin-container">
            <header class="admin-header">
                <h1>"DATA Escape Room Dashboard"</h1>
                <button class="btn-refresh" on:click=refresh>
                    "Refresh"
                </button>
            </header>
            <Transition fallback=|| {
                view! { "Loading..." }
            }>
                {move || {
                    dashboard
                        .with(|res| match res {
                            Some(Ok(data)) => {
                                view! {
                                    <section class="admin-section filters">
                                        <h2>"Filters"</h2>
                                        <FilterChecklist
                                            label="Groups"
                                            options=data.all_groups.clone()
                                            selected=groups
                                        />
                                        <FilterChecklist
                                            label="Classrooms"
                                            options=data.all_rooms.clone()
                                            selected=rooms
                                        />
                                        <button class="btn-clear" on:click=clear_filters>
                                            "Clear filters"
                                        </button>
                                    </section>
                                    {render_dashboard(data)}
                                }
                                    .into_any()
                            }
                            Some(Err(e)) => {
                                view! {
                                    <p class="error">
                                        "Could not load the results sheet: " {e.to_string()}
                                    </p>
                                }
                                    .into_any()
                            }
                            None => view! { "Loading..." }.into_any(),
                        })
                }}
            </Transition>
        </div>
    }
}

#[component]
fn FilterChecklist(
    label: &'static str,
    options: Vec<String>,
    selected: RwSignal<Vec<String>>,
) -> impl IntoView {
    view! {
        <fieldset class="filter">
            <legend>{label}</legend>
            {options
                .into_iter()
                .map(|option| {
                    let value = option.clone();
                    let key = option.clone();
                    view! {
                        <label class="filter-option">
                            <input
                                type="checkbox"
                                prop:checked=move || selected.with(|s| s.contains(&key))
                                on:change=move |ev| {
                                    let checked = event_target_checked(&ev);
                                    selected
                                        .update(|s| {
                                            s.retain(|v| v != &value);
                                            if checked {
                                                s.push(value.clone());
                                            }
                                        });
                                }
                            />
                            {option}
                        </label>
                    }
                })
                .collect_view()}
        </fieldset>
    }
}

fn render_dashboard(data: &Dashboard) -> AnyView {
    let summary = data.summary;
    let qr = data.join_qr_svg.clone().map(|svg| {
        view! {
            <section class="admin-section join">
                <h2>"Join the game"</h2>
                <div class="join-qr" inner_html=svg></div>
            </section>
        }
    });

    view! {
        <section class="admin-section kpis">
            <div class="kpi">
                <span class="kpi-value">{summary.group_count}</span>
                <span class="kpi-label">"Groups"</span>
            </div>
            <div class="kpi">
                <span class="kpi-value">{summary.total_records}</span>
                <span class="kpi-label">"Attempts"</span>
            </div>
            <div class="kpi">
                <span class="kpi-value">{summary.correct}</span>
                <span class="kpi-label">"Correct"</span>
            </div>
            <div class="kpi">
                <span class="kpi-value">{summary.incorrect}</span>
                <span class="kpi-label">"Incorrect"</span>
            </div>
        </section>
        {qr}
        <section class="admin-section">
            <h2>"Leaderboard"</h2>
            {leaderboard_table(&data.leaderboard)}
        </section>
        <section class="admin-section">
            <h2>"Group summary"</h2>
            {group_summary_table(&data.group_summaries)}
        </section>
        <section class="admin-section">
            <h2>"Answers per stage"</h2>
            {tally_bars(&data.stage_tallies)}
        </section>
        <section class="admin-section">
            <h2>"All attempts"</h2>
            {attempts_table(&data.rows)}
        </section>
    }
        .into_any()
}

fn leaderboard_table(entries: &[LeaderboardEntry]) -> AnyView {
    if entries.is_empty() {
        return view! { <p>"No group has cleared every stage yet."</p> }.into_any();
    }
    view! {
        <table class="leaderboard">
            <thead>
                <tr>
                    <th>"Rank"</th>
                    <th>"Group"</th>
                    <th>"Classroom"</th>
                    <th>"Best time"</th>
                </tr>
            </thead>
            <tbody>
                {entries
                    .iter()
                    .map(|entry| {
                        view! {
                            <tr>
                                <td>{entry.rank}</td>
                                <td>{entry.group_name.clone()}</td>
                                <td>{entry.classroom.clone()}</td>
                                <td>{entry.best_time.clone()}</td>
                            </tr>
                        }
                    })
                    .collect_view()}
            </tbody>
        </table>
    }
        .into_any()
}

fn group_summary_table(summaries: &[GroupSummary]) -> AnyView {
    view! {
        <table class="group-summary">
            <thead>
                <tr>
                    <th>"Group"</th>
                    <th>"Classroom"</th>
                    {(1..=STAGE_COUNT)
                        .map(|n| view! { <th>{format!("Stage {}", n)}</th> })
                        .collect_view()}
                    <th>"Time used"</th>
                </tr>
            </thead>
            <tbody>
                {summaries
                    .iter()
                    .map(|summary| {
                        view! {
                            <tr>
                                <td>{summary.group_name.clone()}</td>
                                <td>{summary.classroom.clone()}</td>
                                {summary
                                    .answers
                                    .iter()
                                    .map(|answer| {
                                        view! { <td>{answer.clone().unwrap_or_default()}</td> }
                                    })
                                    .collect_view()}
                                <td>{summary.time_used.clone().unwrap_or_default()}</td>
                            </tr>
                        }
                    })
                    .collect_view()}
            </tbody>
        </table>
    }
        .into_any()
}

fn tally_bars(tallies: &[StageTally]) -> AnyView {
    let max = tallies
        .iter()
        .map(|t| t.correct.max(t.incorrect))
        .max()
        .unwrap_or(0)
        .max(1);
    let width = move |count: usize| format!("width: {}%", count * 100 / max);

    view! {
        <div class="tallies">
            {tallies
                .iter()
                .map(|tally| {
                    view! {
                        <div class="tally-row">
                            <span class="tally-label">{format!("Stage {}", tally.stage)}</span>
                            <div class="tally-bars">
                                <div class="bar correct" style=width(tally.correct)>
                                    {tally.correct}
                                </div>
                                <div class="bar incorrect" style=width(tally.incorrect)>
                                    {tally.incorrect}
                                </div>
                            </div>
                        </div>
                    }
                })
                .collect_view()}
        </div>
    }
        .into_any()
}

fn attempts_table(rows: &[LogRow]) -> AnyView {
    view! {
        <table class="attempts">
            <thead>
                <tr>
                    <th>"Timestamp"</th>
                    <th>"Group"</th>
                    <th>"Classroom"</th>
                    <th>"Stage"</th>
                    <th>"Answer"</th>
                    <th>"Result"</th>
                    <th>"Time used"</th>
                </tr>
            </thead>
            <tbody>
                {rows
                    .iter()
                    .map(|row| {
                        let timestamp = row
                            .timestamp
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_default();
                        let stage = row.stage.map(|s| s.to_string()).unwrap_or_default();
                        view! {
                            <tr>
                                <td>{timestamp}</td>
                                <td>{row.group_name.clone()}</td>
                                <td>{row.classroom.clone()}</td>
                                <td>{stage}</td>
                                <td>{row.answer.clone()}</td>
                                <td>{row.result.clone()}</td>
                                <td>{row.time_used.clone()}</td>
                            </tr>
                        }
                    })
                    .collect_view()}
            </tbody>
        </table>
    }
        .into_any()
}
