use anyhow::{Context, Result};
use autofix_core::models::InstallationPayload;
use autofix_db::NewInstallation;

use crate::JobContext;

/// Keep the installation table in sync with `installation` webhooks.
pub async fn handle_installation_event(
    ctx: &JobContext,
    payload: &InstallationPayload,
) -> Result<()> {
    let installation = &payload.installation;
    match payload.action.as_str() {
        "created" => {
            let record = NewInstallation {
                installation_id: installation.id,
                account_login: installation.account_login(),
                account_type: installation.account_type(),
            };
            tracing::info!(
                "Installation {} created for {}",
                record.installation_id,
                record.account_login
            );
            ctx.store
                .upsert_installation(&record)
                .await
                .with_context(|| format!("Failed to store installation {}", installation.id))?;
        }
        "deleted" => {
            tracing::info!("Installation {} deleted", installation.id);
            ctx.store
                .delete_installation(installation.id)
                .await
                .with_context(|| format!("Failed to delete installation {}", installation.id))?;
        }
        action => {
            tracing::debug!("Ignoring installation action {} for {}", action, installation.id);
        }
    }
    Ok(())
}
