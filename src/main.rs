mod api;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;

use domain::roles::PERMISSION_CATALOG;
use services::{accounts, CpvTreeCache, RedisCache};

#[derive(Parser)]
#[command(name = "tenderhub-backend", version, about = "TenderHub API server and maintenance commands")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Replace the CPV dictionary from a CSV file (code,name_ua,name_en)
    ImportCpv { path: PathBuf },
    /// Resynchronise the permission catalog
    SeedPermissions,
    /// Create a superuser account
    CreateSuperuser {
        #[arg(long)]
        email: String,
        #[arg(long, env = "SUPERUSER_PASSWORD")]
        password: String,
        #[arg(long, default_value = "Admin")]
        first_name: String,
        #[arg(long, default_value = "Admin")]
        last_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = config::Settings::from_env()?;

    logging::init_logging(&settings.env);

    let pool = db::create_pool(&settings).await?;
    if settings.run_migrations {
        db::run_migrations(&pool).await?;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, settings).await,
        Command::ImportCpv { path } => import_cpv(&pool, &settings, &path).await,
        Command::SeedPermissions => seed_permissions(&pool).await,
        Command::CreateSuperuser {
            email,
            password,
            first_name,
            last_name,
        } => create_superuser(&pool, &email, &password, &first_name, &last_name).await,
    }
}

async fn connect_redis(settings: &config::Settings) -> Option<RedisCache> {
    let url = settings.redis_url.as_deref()?;
    match RedisCache::new(url, settings.redis_cache_ttl_seconds).await {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable - caching CPV tree in process");
            None
        }
    }
}

async fn serve(pool: PgPool, settings: config::Settings) -> Result<()> {
    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting TenderHub backend"
    );

    tokio::fs::create_dir_all(&settings.media_root)
        .await
        .with_context(|| format!("Failed to create MEDIA_ROOT {}", settings.media_root.display()))?;

    let cpv_cache = CpvTreeCache::new(connect_redis(&settings).await);
    let state = app::AppState::new(pool, settings.clone(), cpv_cache);
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn import_cpv(pool: &PgPool, settings: &config::Settings, path: &std::path::Path) -> Result<()> {
    let rows = services::cpv::read_csv(path)?;
    if rows.is_empty() {
        anyhow::bail!("{} contains no valid CPV rows; refusing to empty the dictionary", path.display());
    }

    let written = services::cpv::import(pool, &rows).await?;
    CpvTreeCache::new(connect_redis(settings).await).invalidate().await;

    tracing::info!(written, path = %path.display(), "CPV import finished");
    Ok(())
}

async fn seed_permissions(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (code, label) in PERMISSION_CATALOG {
        sqlx::query(
            r#"
            INSERT INTO permissions (code, label) VALUES ($1, $2)
            ON CONFLICT (code) DO UPDATE SET label = EXCLUDED.label
            "#,
        )
        .bind(*code)
        .bind(*label)
        .execute(&mut *tx)
        .await?;
    }

    // Administrator roles always hold the full catalog
    let granted = sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id)
        SELECT r.id, p.id FROM roles r CROSS JOIN permissions p
        WHERE r.is_system AND r.name = $1
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(domain::roles::ADMIN_ROLE_NAME)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    tracing::info!(permissions = PERMISSION_CATALOG.len(), granted, "Permissions synchronised");
    Ok(())
}

async fn create_superuser(pool: &PgPool, email: &str, password: &str, first_name: &str, last_name: &str) -> Result<()> {
    let problems = auth::password::password_problems(password, email);
    if !problems.is_empty() {
        anyhow::bail!("Weak password: {}", problems.join("; "));
    }

    let mut conn = pool.acquire().await?;
    let user = accounts::create_user(
        &mut *conn,
        accounts::NewUser {
            email,
            password,
            first_name,
            last_name,
            middle_name: None,
            phone: None,
            is_superuser: true,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to create superuser: {e}"))?;

    tracing::info!(user_id = %user.id, email = %user.email, "Superuser created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::try_parse_from(["tenderhub-backend"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn import_cpv_takes_a_path() {
        let cli = Cli::try_parse_from(["tenderhub-backend", "import-cpv", "cpv.csv"]).unwrap();
        match cli.command {
            Some(Command::ImportCpv { path }) => assert_eq!(path, PathBuf::from("cpv.csv")),
            _ => panic!("expected import-cpv"),
        }
    }

    #[test]
    fn create_superuser_requires_email() {
        assert!(Cli::try_parse_from(["tenderhub-backend", "create-superuser", "--password", "x"]).is_err());
    }
}
