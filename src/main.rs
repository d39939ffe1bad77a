use anyhow::Context;
use keywarden::{
    authz::{self, ResourceAccessManager},
    config::AppConfig,
    security::SecurityManager,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keywarden=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting keywarden v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(root = %config.security.root.display(), "Configuration loaded");

    if config.security.initial_master_secret.is_some() {
        warn!("initial_master_secret is set; remove it once the security root is bootstrapped");
    }

    let security = SecurityManager::open(config.security.clone())
        .context("Failed to open security root")?;
    let master = security.master_password_config();
    info!(
        provider = %master.provider_name,
        providers = security.provider_names().len(),
        entries = security.keystore().aliases()?.len(),
        "Master secret available"
    );

    // Inline rules first, then the rule file, so the file wins on conflicts
    let mut rules = config.authorization.rules.clone();
    if let Some(path) = &config.authorization.rules_file {
        let file_rules = authz::load_rule_file(path)
            .with_context(|| format!("Failed to load access rules from {}", path.display()))?;
        info!(path = %path.display(), rules = file_rules.len(), "Loaded access rules file");
        rules.extend(file_rules);
    }

    let access = ResourceAccessManager::from_rules(&rules);
    info!(
        rules = rules.len(),
        nodes = access.snapshot().len(),
        "Authorization tree ready"
    );

    Ok(())
}
