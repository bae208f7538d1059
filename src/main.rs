#[cfg(feature = "ssr")]
#[tokio::main]
async fn main() {
    use axum::extract::Path;
    use axum::routing::get;
    use axum::Router;
    use data_escape_room::app::*;
    use data_escape_room::{download_dataset, AppState};
    use leptos::logging::{log, warn};
    use leptos::prelude::*;
    use leptos_axum::{generate_route_list, LeptosRoutes};

    let state = AppState::from_env().expect("Invalid configuration.");
    if !state.webhook.is_configured() {
        warn!("WEBHOOK_URL is not set; every attempt will report a logging failure.");
    }
    if state.config.sheet_source.is_none() {
        warn!("SHEET_CSV_URL is not set; the admin dashboard has no data.");
    }
    log!("Serving datasets from {}", state.config.data_dir.display());

    let conf = get_configuration(None).unwrap();
    let addr = conf.leptos_options.site_addr;
    let leptos_options = conf.leptos_options;
    // Generate the list of routes in your Leptos App
    let routes = generate_route_list(App);

    let leptos_options_clone = leptos_options.clone();
    let context_state = state.clone();
    let app = Router::new()
        .route(
            "/datasets/{file}",
            get(move |Path(file): Path<String>| {
                let state = state.clone();
                async move { download_dataset(&state, &file).await }
            }),
        )
        .leptos_routes_with_context(
            &leptos_options,
            routes,
            // Provide the game state for server functions.
            move || provide_context(context_state.clone()),
            move || shell(leptos_options_clone.clone()),
        )
        // Use shell for fallback.
        .fallback(leptos_axum::file_and_error_handler(shell))
        .with_state(leptos_options.clone());

    log!("listening on http://{}", &addr);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app.into_make_service())
        .await
        .unwrap();
}

#[cfg(not(feature = "ssr"))]
pub fn main() {
    // no client-side main function
    // see lib.rs for hydration function instead
}
