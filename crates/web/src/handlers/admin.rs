use std::sync::Arc;

use autofix_core::{AppError, config::Config, models::APP_TITLE};
use autofix_db::{InstallationRecord, InstallationStore};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use maud::{DOCTYPE, Markup, html};

use crate::handlers::bearer_authorized;

pub async fn admin(
    State(config): State<Arc<Config>>,
    State(store): State<Arc<dyn InstallationStore>>,
    headers: HeaderMap,
) -> Result<Markup, AppError> {
    if !bearer_authorized(&headers, config.admin.token.as_deref()) {
        return Err(AppError::Status(StatusCode::UNAUTHORIZED));
    }
    let installations = store.list_installations().await?;
    Ok(html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { (APP_TITLE) " • Admin" }
            }
            body {
                main {
                    h1 { (APP_TITLE) }
                    h3 { "Installations" }
                    @if installations.is_empty() {
                        article { "No installations yet." }
                    }
                    @for installation in &installations {
                        (installation_fragment(installation))
                    }
                }
            }
        }
    })
}

fn installation_fragment(installation: &InstallationRecord) -> Markup {
    html! {
        article {
            header {
                strong { (installation.account_login) }
                " (" (installation.account_type) ") • installation " (installation.installation_id)
                br;
                small { "Added " (installation.created_at) ", updated " (installation.updated_at) }
            }
            @if installation.repo_configs.is_empty() {
                p { "No repo config stored yet." }
            }
            @for config in &installation.repo_configs {
                section {
                    h4 { (config.repo_full_name) }
                    small { "Updated " (config.updated_at) }
                    pre { code { (config.config_json) } }
                }
            }
        }
    }
}
