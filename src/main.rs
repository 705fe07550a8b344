use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use filmoteca::config::BootstrapConfig;
use filmoteca::identity::{
    guard, MemoryProfileStore, MemorySessionStore, Role, RouteAccess, SessionBootstrapper, SessionState, SessionView,
    SystemClock, UserAdmin,
};

fn describe(state: &SessionState) -> String {
    format!(
        "identity={} role={} loading={} error={} admin_route={:?}",
        state.identity.as_ref().map(|i| i.email.as_str()).unwrap_or("<none>"),
        state.role.map(|r| r.as_str()).unwrap_or("<none>"),
        state.loading,
        state.error.as_deref().unwrap_or("<none>"),
        guard(state, RouteAccess::AdminOnly),
    )
}

async fn settle(view: &mut SessionView, step: &str) -> anyhow::Result<SessionState> {
    let state = view.settled().await.context("session bootstrapper went away")?;
    info!(target: "filmoteca", "{}: {}", step, describe(&state));
    Ok(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;
    fmt().with_env_filter(filter).init();

    let config = BootstrapConfig::from_env();
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "filmoteca",
        "filmoteca session demo starting: RUST_LOG='{}', max_attempts={}, budget_ms={}, base_ms={}, jitter_ms={}",
        rust_log, config.max_attempts, config.budget_ms, config.base_delay_ms, config.jitter_ms
    );

    let sessions = Arc::new(MemorySessionStore::new());
    let profiles = Arc::new(MemoryProfileStore::new());
    let bootstrapper = Arc::new(SessionBootstrapper::new(
        sessions.clone(),
        profiles.clone(),
        Arc::new(SystemClock),
        config.into_policy(),
    ));
    let attachment = bootstrapper.attach()?;
    let mut view = bootstrapper.subscribe();
    settle(&mut view, "startup").await?;

    bootstrapper.sign_up("ana@filmoteca.test", "butaca-12", "Ana").await?;
    let ana = settle(&mut view, "sign_up ana").await?;
    let ana_id = ana.identity.as_ref().map(|i| i.id.clone()).context("ana has no identity")?;
    bootstrapper.sign_out().await?;

    bootstrapper.sign_up("bruno@filmoteca.test", "palomitas", "Bruno").await?;
    let bruno = settle(&mut view, "sign_up bruno").await?;
    let bruno_id = bruno.identity.as_ref().map(|i| i.id.clone()).context("bruno has no identity")?;
    bootstrapper.sign_out().await?;

    // Promote ana through the admin API on behalf of a synthesized operator session,
    // standing in for an out-of-band change in the document store console.
    let admin = UserAdmin::new(profiles.clone());
    let operator = SessionState::resolved(filmoteca::identity::Identity::new(ana_id.clone(), "ana@filmoteca.test"), Role::Admin);
    admin.update_role(&operator, &ana_id, Role::Admin).await?;

    let role = bootstrapper.sign_in("ana@filmoteca.test", "butaca-12").await?;
    let actor = settle(&mut view, "sign_in ana").await?;
    info!(target: "filmoteca", "ana signed in as {}", role);

    let stats = admin.user_stats(&actor).await?;
    info!(target: "filmoteca", "users total={} active={} admins={}", stats.total, stats.active, stats.admins);
    admin.set_active(&actor, &bruno_id, false).await?;
    bootstrapper.sign_out().await?;
    settle(&mut view, "sign_out ana").await?;

    match bootstrapper.sign_in("bruno@filmoteca.test", "palomitas").await {
        Ok(role) => info!(target: "filmoteca", "bruno unexpectedly signed in as {}", role),
        Err(e) => info!(target: "filmoteca", "bruno refused: {}", e),
    }
    settle(&mut view, "sign_in bruno").await?;
    info!(target: "filmoteca", "session store sign-out calls: {}", sessions.sign_out_calls());

    let snapshot = serde_json::json!({
        "session": bootstrapper.state(),
        "profiles": admin.list_users(&actor).await?.into_iter().collect::<std::collections::BTreeMap<_, _>>(),
    });
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    attachment.detach();
    Ok(())
}
