use std::collections::VecDeque;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use vendor_registry::domain::{hash_from_hex, hash_to_hex, Hash256};
use vendor_registry::infra::{CertificateStore, PgCertificateStore};
use vendor_registry::metrics::MetricsRegistry;
use vendor_registry::registry::{ArtifactPipeline, FsArtifactStore, HtmlTemplateRenderer};
use vendor_registry::RegistryConfig;

fn print_help() {
    eprintln!(
        "\
vendor-registry-admin

USAGE:
  vendor-registry-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  sweep-artifacts                 Render and store missing certificate artifacts
  set-active                      Revoke or reinstate a certificate

COMMON OPTIONS:
  --database-url <postgres_url>    (defaults to env DATABASE_URL)

sweep-artifacts OPTIONS:
  --limit <n>                     (default: 100)

set-active OPTIONS:
  --certificate-hash <hex>        (required)
  --active <true|false>           (required)

ENV:
  ARTIFACT_DIR                    Artifact output directory (default: ./artifacts)
  ISSUING_AUTHORITY               Name printed on rendered certificates
"
    );
}

fn require_database_url(database_url: Option<String>) -> anyhow::Result<String> {
    database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required (or pass --database-url)"))
}

fn next_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("expected true or false, got {other}"),
    }
}

fn parse_hash(raw: &str) -> anyhow::Result<Hash256> {
    hash_from_hex(raw).ok_or_else(|| anyhow::anyhow!("invalid certificate hash: {raw}"))
}

async fn connect(database_url: Option<String>) -> anyhow::Result<PgPool> {
    let database_url = require_database_url(database_url)?;
    Ok(PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "migrate" => {
            let mut database_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(next_value(&mut args, &arg)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let pool = connect(database_url).await?;
            vendor_registry::migrations::run_postgres(&pool).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "sweep-artifacts" => {
            let mut database_url: Option<String> = None;
            let mut limit: usize = 100;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(next_value(&mut args, &arg)?),
                    "--limit" => limit = next_value(&mut args, &arg)?.parse()?,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let pool = connect(database_url).await?;
            let config = RegistryConfig::from_env()?;
            let pipeline = ArtifactPipeline::new(
                Arc::new(PgCertificateStore::new(pool)),
                Arc::new(HtmlTemplateRenderer),
                Arc::new(FsArtifactStore::from_env()),
                config.issuing_authority,
                Arc::new(MetricsRegistry::new()),
            );

            let stored = pipeline.retry_missing(limit).await?;
            println!("ok: {stored} artifact(s) stored");
            Ok(())
        }
        "set-active" => {
            let mut database_url: Option<String> = None;
            let mut certificate_hash: Option<Hash256> = None;
            let mut active: Option<bool> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => database_url = Some(next_value(&mut args, &arg)?),
                    "--certificate-hash" => {
                        certificate_hash = Some(parse_hash(&next_value(&mut args, &arg)?)?)
                    }
                    "--active" => active = Some(parse_bool(&next_value(&mut args, &arg)?)?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let certificate_hash = certificate_hash
                .ok_or_else(|| anyhow::anyhow!("--certificate-hash is required"))?;
            let active = active.ok_or_else(|| anyhow::anyhow!("--active is required"))?;

            let pool = connect(database_url).await?;
            let store = PgCertificateStore::new(pool);
            if !store.set_active(&certificate_hash, active).await? {
                anyhow::bail!("certificate not found: {}", hash_to_hex(&certificate_hash));
            }
            println!(
                "ok: certificate {} is now {}",
                hash_to_hex(&certificate_hash),
                if active { "active" } else { "inactive" }
            );
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
