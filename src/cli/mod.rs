use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::keys::KeyCache;
use crate::server::settings::Settings;
use crate::trust::credentials::CredentialSigner;
use crate::trust::evaluator::Evaluator;
use crate::trust::token::IdentityToken;

/// Evaluate a token against a role from the command line, without the
/// HTTP server. Prints the issued credential as JSON on success; exits
/// non-zero with the denial reason otherwise.
pub async fn handle_evaluate(
    settings: Settings,
    role_name: &str,
    token_file: &str,
    duration: Option<u64>,
) -> Result<()> {
    if duration == Some(0) {
        anyhow::bail!("--duration must be positive");
    }

    let raw_token = read_token(token_file)?;

    let roles = settings.compile_roles()?;
    let role = roles
        .get(role_name)
        .with_context(|| format!("unknown role '{}'", role_name))?;

    let signer = CredentialSigner::new(
        &settings.broker.signing_secret,
        settings.server.public_url.clone(),
    )
    .context("failed to initialize credential signer")?;
    let evaluator = Evaluator::new(signer);
    let key_cache = KeyCache::new(settings.keys.cache_config());

    let token = match IdentityToken::parse(raw_token.trim()) {
        Ok(token) => token,
        Err(err) => {
            eprintln!("Denied: {}", err);
            std::process::exit(1);
        }
    };

    if !role.allows_issuer(&token.claims.iss) {
        eprintln!(
            "Denied: no trust condition on role '{}' names issuer '{}'",
            role_name, token.claims.iss
        );
        std::process::exit(1);
    }

    let keys = match key_cache.key_set(&token.claims.iss).await {
        Ok(keys) => keys,
        Err(err) => {
            eprintln!("Denied: {}", err);
            std::process::exit(1);
        }
    };

    let requested = duration.map(Duration::from_secs);
    match evaluator.evaluate(&token, &keys, &role, Utc::now(), requested) {
        Ok(credential) => {
            println!("{}", serde_json::to_string_pretty(&credential)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("Denied: {}", err);
            std::process::exit(1);
        }
    }
}

/// Validate the configuration and print a summary of the trust policy.
pub fn handle_validate(settings: Settings) -> Result<()> {
    // Settings::new already ran the full validation; compile once more to
    // print what an operator cares about.
    let roles = settings.compile_roles()?;

    println!("Configuration OK: {} role(s)", roles.len());
    let mut names: Vec<_> = roles.iter().collect();
    names.sort_by(|a, b| a.name.cmp(&b.name));
    for role in names {
        println!(
            "  {} (max session {}s, {} condition(s))",
            role.name,
            role.max_session.as_secs(),
            role.trust_conditions.len()
        );
        for condition in &role.trust_conditions {
            println!(
                "    issuer={} audience={} subject={}",
                condition.issuer,
                condition.audience,
                condition.subject.as_str()
            );
        }
    }
    Ok(())
}

fn read_token(token_file: &str) -> Result<String> {
    if token_file == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read token from stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(token_file)
            .with_context(|| format!("failed to read token file '{}'", token_file))
    }
}
